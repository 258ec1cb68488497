//! IAP checkout CLI - Database migrations and management tools.
//!
//! # Usage
//!
//! ```bash
//! # Run checkout database migrations
//! iap-cli migrate
//!
//! # Create a purchaser and print a bearer token
//! iap-cli user create -e learner@example.org -u learner
//!
//! # Issue another token for an existing purchaser
//! iap-cli user token -e learner@example.org
//!
//! # Add a product to the catalog
//! iap-cli product add -s 8CF08E5 -t "Verified seat" -p 49.00
//!
//! # Import a catalog from YAML
//! iap-cli product import catalog.yaml
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

mod commands;

#[derive(Parser)]
#[command(name = "iap-cli")]
#[command(author, version, about = "IAP checkout CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage purchasers and their bearer tokens
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Manage the product catalog
    Product {
        #[command(subcommand)]
        action: ProductAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a purchaser and issue a token
    Create {
        /// Purchaser email address
        #[arg(short, long)]
        email: String,

        /// Purchaser username
        #[arg(short, long)]
        username: String,
    },
    /// Issue an additional token for an existing purchaser
    Token {
        /// Purchaser email address
        #[arg(short, long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum ProductAction {
    /// Add or update a single product
    Add {
        /// Store SKU
        #[arg(short, long)]
        sku: String,

        /// Product title
        #[arg(short, long)]
        title: String,

        /// Price, e.g. 49.00
        #[arg(short, long)]
        price: Decimal,

        /// ISO 4217 currency code
        #[arg(short, long, default_value = "USD")]
        currency: String,
    },
    /// Import products from a YAML file
    Import {
        /// Path to the catalog file
        file: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::User { action } => match action {
            UserAction::Create { email, username } => {
                commands::user::create(&email, &username).await?;
            }
            UserAction::Token { email } => commands::user::token(&email).await?,
        },
        Commands::Product { action } => match action {
            ProductAction::Add {
                sku,
                title,
                price,
                currency,
            } => commands::product::add(&sku, &title, price, &currency).await?,
            ProductAction::Import { file } => commands::product::import(&file).await?,
        },
    }
    Ok(())
}
