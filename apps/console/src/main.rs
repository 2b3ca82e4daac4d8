use std::sync::Arc;

use anyhow::{bail, Result};
use board_core::{
    login, AuthContext, BoardStage, BoardViewModel, CustomerDataClient, HttpCustomerClient,
    HttpOrderClient, OrderDataClient,
};
use clap::{Parser, Subcommand};
use shared::{domain::OrderId, protocol::CustomerListQuery};

#[derive(Parser, Debug)]
#[command(name = "orderboard", about = "Console client for the door manufacturing order board")]
struct Args {
    #[arg(long)]
    server_url: String,
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the kanban board columns
    Board,
    /// Move an order between columns and reconcile with the server
    Move {
        #[arg(long)]
        order_id: i64,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    /// Print order statistics
    Stats,
    /// List customers
    Customers {
        #[arg(long)]
        search: Option<String>,
    },
}

fn stage_from_arg(raw: &str) -> Result<BoardStage> {
    match raw {
        "new" => Ok(BoardStage::New),
        "in_progress" => Ok(BoardStage::InProgress),
        "completed" => Ok(BoardStage::Completed),
        other => bail!("unknown stage '{other}' (expected new, in_progress or completed)"),
    }
}

async fn print_board(board: &BoardViewModel) {
    let snapshot = board.snapshot().await;
    for column in &snapshot.columns {
        println!("{} ({})", column.stage.title(), column.orders.len());
        for order in &column.orders {
            println!("  [{}] {} ({})", order.order_number, order.title, order.priority.as_str());
        }
    }
    if let Some(error) = snapshot.last_error {
        println!("last error: {error}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let http = reqwest::Client::new();
    let session = login(&http, &args.server_url, &args.username, &args.password).await?;
    println!(
        "Logged in as {} (session until {})",
        session.user.display_name, session.expires_at
    );

    let auth = Arc::new(AuthContext::new());
    auth.begin_session(session).await;
    let orders = Arc::new(HttpOrderClient::new(args.server_url.clone(), auth.clone()));

    match args.command {
        Command::Board => {
            let board = BoardViewModel::new(orders);
            board.load().await?;
            print_board(&board).await;
        }
        Command::Move {
            order_id,
            from,
            to,
            index,
        } => {
            let board = BoardViewModel::new(orders);
            board.load().await?;
            board
                .move_order(
                    OrderId(order_id),
                    stage_from_arg(&from)?,
                    stage_from_arg(&to)?,
                    index,
                )
                .await?;
            print_board(&board).await;
        }
        Command::Stats => {
            let stats = orders.statistics().await?;
            println!("total orders: {}", stats.total);
            println!("  new:         {}", stats.by_status.new);
            println!("  in progress: {}", stats.by_status.in_progress);
            println!("  paused:      {}", stats.by_status.paused);
            println!("  completed:   {}", stats.by_status.completed);
            println!("  cancelled:   {}", stats.by_status.cancelled);
            println!("overdue: {}", stats.overdue_count);
        }
        Command::Customers { search } => {
            let customers = HttpCustomerClient::new(args.server_url.clone(), auth.clone());
            let listed = customers
                .list(&CustomerListQuery {
                    search,
                    ..Default::default()
                })
                .await?;
            for customer in listed.data {
                println!(
                    "{} <{}> [{}]",
                    customer.name,
                    customer.email,
                    customer.status.as_str()
                );
            }
        }
    }

    auth.end_session().await;
    Ok(())
}
