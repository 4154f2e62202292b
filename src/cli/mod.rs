use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:8000")]
    pub server_addr: String,

    /// Base URL of the model backend (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "BACKEND_URL", default_value = "http://localhost:11434")]
    pub backend_url: String,

    /// Path of the JSON file the conversation history is persisted to.
    #[arg(long, env = "HISTORY_PATH", default_value = "chatlog.json")]
    pub history_path: String,

    /// System prompt seeding every fresh conversation.
    #[arg(
        long,
        env = "SYSTEM_PROMPT",
        default_value = "You are a friendly and helpful AI assistant."
    )]
    pub system_prompt: String,

    /// Per-request timeout for backend calls, in seconds.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,
}
