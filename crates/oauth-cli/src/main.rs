#[tokio::main]
async fn main() {
    let code = oauth_cli::run_cli().await;
    std::process::exit(code);
}
