#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Tracing, .env loading and AUTH_TOKEN validation happen inside; a bind
    // failure or missing token ends the process with a non-zero status.
    relay_server::run_with_config().await
}
