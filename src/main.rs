// Entry point for the ledger-chain CLI. All user-facing text lives here;
// the library only logs.
use clap::Parser;
use data_encoding::HEXLOWER;
use ledger_chain::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Blockchain,
    Command, Config, Opt, Transaction, UTXOSet, Wallets,
};
use log::{error, LevelFilter};
use std::process;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(opt.config.as_deref())?;

    match opt.command {
        Command::Createblockchain { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            let blockchain = Blockchain::init(&config, &address)?;
            // The index starts out holding just the genesis coinbase.
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::load(&config.wallet_path)?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            let pub_key_hash = address_to_pub_key_hash(&address)?;
            let blockchain = Blockchain::resume(&config)?;
            let utxo_set = UTXOSet::new(blockchain);
            let balance = utxo_set.get_balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::load(&config.wallet_path)?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send { from, to, amount } => {
            if !validate_address(&from) {
                return Err(format!("Invalid sender address: {from}").into());
            }
            if !validate_address(&to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }

            let wallets = Wallets::load(&config.wallet_path)?;
            let wallet = wallets.get_wallet(&from)?;

            let blockchain = Blockchain::resume(&config)?;
            let utxo_set = UTXOSet::new(blockchain.clone());
            let transaction = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set)?;

            // No mempool: the transaction is mined straight into its own block.
            let block = blockchain.add_block(&[transaction])?;
            utxo_set.update(&block)?;
            println!("Success!")
        }
        Command::Printchain => {
            let blockchain = Blockchain::resume(&config)?;
            for block in blockchain.iterator() {
                let block = block?;
                println!("Prev. hash: {}", HEXLOWER.encode(block.get_pre_block_hash()));
                println!("Hash: {}", block.get_hash_hex());
                println!("Nonce: {}", block.get_nonce());
                println!("PoW: {}", block.validate_pow());

                for tx in block.get_transactions() {
                    println!("{tx}");
                    if !tx.is_coinbase() {
                        for input in tx.get_vin() {
                            let address = convert_address(&hash_pub_key(input.get_pub_key()));
                            println!("-- Input from {address}");
                        }
                    }
                    for output in tx.get_vout() {
                        let address = convert_address(output.get_pub_key_hash());
                        println!("-- Output value = {}, to = {address}", output.get_value());
                    }
                }
                println!()
            }
        }
        Command::Reindexutxo => {
            let blockchain = Blockchain::resume(&config)?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
    }
    Ok(())
}
