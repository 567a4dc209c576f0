// CLI commands

use crate::config::ChainConfig;
use crate::core::Transaction;
use crate::error::{LedgerError, Result};
use crate::storage::{Blockchain, UtxoSet};
use crate::wallet::{Address, TransactionBuilder, Wallets};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "utxo-ledger")]
#[command(about = "Single-node proof-of-work UTXO ledger", long_about = None)]
pub struct Cli {
    /// Directory holding the ledger database and the wallet file
    #[arg(long, global = true, default_value = "./data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a blockchain and send the genesis reward to ADDRESS
    #[command(name = "createblockchain")]
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },

    /// Generate a new key pair and save it to the wallet file
    #[command(name = "createwallet")]
    CreateWallet,

    /// List the addresses in the wallet file
    #[command(name = "listaddresses")]
    ListAddresses,

    /// Get the balance of ADDRESS
    #[command(name = "getbalance")]
    GetBalance {
        #[arg(long)]
        address: String,
    },

    /// Send AMOUNT of coins from FROM to TO and mine the block
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
    },

    /// Print all the blocks of the blockchain
    #[command(name = "printchain")]
    PrintChain,

    /// Rebuild the UTXO set
    #[command(name = "reindexutxo")]
    ReindexUtxo,
}

/// CLI handler
pub struct CliHandler {
    chain_config: ChainConfig,
    wallet_path: PathBuf,
}

impl CliHandler {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            chain_config: ChainConfig::new(data_dir.join("blockchain")),
            wallet_path: data_dir.join("wallet.json"),
        }
    }

    /// Handle CLI command
    pub fn handle(&self, command: Commands) -> Result<()> {
        match command {
            Commands::CreateBlockchain { address } => self.create_blockchain(&address),
            Commands::CreateWallet => self.create_wallet(),
            Commands::ListAddresses => self.list_addresses(),
            Commands::GetBalance { address } => self.get_balance(&address),
            Commands::Send { from, to, amount } => self.send(&from, &to, amount),
            Commands::PrintChain => self.print_chain(),
            Commands::ReindexUtxo => self.reindex_utxo(),
        }
    }

    fn create_blockchain(&self, address: &str) -> Result<()> {
        let address: Address = address.parse()?;
        if let Some(parent) = self.wallet_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let chain = Blockchain::create(&self.chain_config, &address)?;
        println!("Done! Genesis block {}", chain.tip());
        Ok(())
    }

    fn create_wallet(&self) -> Result<()> {
        let mut wallets = Wallets::load_or_default(&self.wallet_path)?;
        let address = wallets.create_wallet();

        if let Some(parent) = self.wallet_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        wallets.save(&self.wallet_path)?;

        println!("Your new address: {}", address);
        Ok(())
    }

    fn list_addresses(&self) -> Result<()> {
        let wallets = Wallets::load_or_default(&self.wallet_path)?;
        for address in wallets.addresses() {
            println!("{}", address);
        }
        Ok(())
    }

    fn get_balance(&self, address: &str) -> Result<()> {
        let address: Address = address.parse()?;
        let chain = Blockchain::open(&self.chain_config)?;
        let utxo_set = UtxoSet::new(&chain);

        let balance = TransactionBuilder::new(&utxo_set).balance(&address)?;
        println!("Balance of '{}': {}", address, balance);
        Ok(())
    }

    fn send(&self, from: &str, to: &str, amount: u64) -> Result<()> {
        let from: Address = from.parse()?;
        let to: Address = to.parse()?;

        let wallets = Wallets::load_or_default(&self.wallet_path)?;
        let keypair = wallets
            .get(&from)
            .ok_or_else(|| LedgerError::InvalidAddress(format!("{}: not in wallet file", from)))?;

        let mut chain = Blockchain::open(&self.chain_config)?;
        let tx = {
            let utxo_set = UtxoSet::new(&chain);
            TransactionBuilder::new(&utxo_set).build(keypair, &to, amount)?
        };
        // The sender mines the block and collects its reward
        let reward = Transaction::coinbase(&from, "")?;

        let block = chain.mine_block(vec![reward, tx])?;
        println!("Success! Block {}", block.hash);
        Ok(())
    }

    fn print_chain(&self) -> Result<()> {
        let chain = Blockchain::open(&self.chain_config)?;
        let pow = chain.pow();

        for block in chain.iter() {
            let block = block?;
            println!("============ Block {} ============", block.hash);
            match &block.prev_block_hash {
                Some(prev) => println!("Prev. block: {}", prev),
                None => println!("Prev. block: (genesis)"),
            }
            println!("Timestamp: {}", block.timestamp);
            println!("Nonce: {}", block.nonce);
            println!("PoW: {}", pow.validate(&block));
            for tx in &block.transactions {
                print!("{}", tx);
            }
            println!();
        }
        Ok(())
    }

    fn reindex_utxo(&self) -> Result<()> {
        let chain = Blockchain::open(&self.chain_config)?;
        let count = UtxoSet::new(&chain).reindex()?;
        println!("Done! There are {} transactions in the UTXO set.", count);
        Ok(())
    }
}
