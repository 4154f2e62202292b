pub mod backend;
pub mod cli;
pub mod history;
pub mod models;
pub mod relay;
pub mod server;

use backend::BackendClient;
use cli::Args;
use history::ConversationStore;
use log::info;
use relay::ChatRelay;
use server::Server;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Backend URL: {}", args.backend_url);
    info!("History Path: {}", args.history_path);
    info!("Request Timeout: {}s", args.request_timeout_secs);
    info!("-------------------------");

    let store = ConversationStore::restore(&args.history_path, &args.system_prompt);
    let backend = BackendClient::new(
        &args.backend_url,
        Duration::from_secs(args.request_timeout_secs)
    )?;
    let relay = Arc::new(ChatRelay::new(Arc::new(Mutex::new(store)), backend));

    let server = Server::new(args.server_addr.clone(), relay);
    server.run().await
}
