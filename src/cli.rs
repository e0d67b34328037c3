use anyhow::Context;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    api::router,
    config::Config,
    engine::{BookSnapshot, DEFAULT_DEPTH, OrderBookEngine},
    instrument::Pair,
    orders::{NewOrder, OrderKind, Side},
    state::AppState,
    store::Store,
    transaction::{NewDeposit, TxStatus, TxStatusUpdate},
    utils::{init_tracing, shutdown_token},
};

/// Order and wallet bookkeeping service for a spot exchange
#[derive(Parser)]
#[command(name = "exchange-engine")]
#[command(version, about = "Single-node order book with balance locking")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve(Config),

    /// Walk through a place/cancel cycle in-process and print the state
    Demo {
        /// Trading pair, BASE/QUOTE
        #[arg(long, default_value = "BTC/USDT")]
        pair: String,

        /// Quote balance to fund the demo wallet with
        #[arg(long, default_value = "1000")]
        funds: Decimal,
    },
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(config) => serve(config).await,
        Commands::Demo { pair, funds } => {
            init_tracing("warn");
            demo(&pair, funds)
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    init_tracing(&config.log_level);
    let addr = config.addr();
    let app = router(AppState::new(config));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("listening on {}", listener.local_addr()?);

    let token = shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    info!("server stopped");
    Ok(())
}

fn demo(pair: &str, funds: Decimal) -> anyhow::Result<()> {
    let mut engine = OrderBookEngine::new(Store::new());
    let quote = pair.parse::<Pair>()?.quote.to_string();

    let dep = engine.deposit(
        "demo",
        NewDeposit {
            asset: quote.clone(),
            amount: funds,
            network: "internal".into(),
            tx_hash: None,
        },
    )?;
    engine.update_transaction_status(
        &dep.id,
        TxStatusUpdate {
            status: TxStatus::Completed,
            tx_hash: None,
            confirmations: Some(1),
        },
    )?;
    println!("funded: {:?}", engine.balance("demo", &quote)?);

    // two bids that together stay within the funded balance
    let amount = (funds / Decimal::from(100_000)).round_dp(8);
    let mut placed = Vec::new();
    for price in [Decimal::from(49_000), Decimal::from(50_000)] {
        let order = engine.place_order(
            "demo",
            NewOrder {
                pair: pair.to_string(),
                side: Side::Buy,
                kind: OrderKind::Limit,
                amount,
                price: Some(price),
            },
        )?;
        println!(
            "placed {} buy {} @ {} (locked {})",
            order.id, order.amount, price, order.locked
        );
        placed.push(order.id);
    }
    println!("after placing: {:?}", engine.balance("demo", &quote)?);
    print_order_book(&engine.get_order_book(pair, DEFAULT_DEPTH)?);

    for id in placed {
        let order = engine.cancel_order(&id, "demo")?;
        println!("cancelled {} ({:?})", order.id, order.status);
    }
    println!("after cancelling: {:?}", engine.balance("demo", &quote)?);
    Ok(())
}

fn print_order_book(book: &BookSnapshot) {
    println!("------ Order Book {} ------", book.pair);
    println!("Bids (highest first):");
    for level in &book.bids {
        println!(
            "Price: {}, Total Qty: {}, Orders: {}",
            level.price, level.amount, level.orders
        );
    }

    println!("Asks (lowest first):");
    for level in &book.asks {
        println!(
            "Price: {}, Total Qty: {}, Orders: {}",
            level.price, level.amount, level.orders
        );
    }
    println!("--------------------------");
}
