// This main function is the entry point when running `cargo run -p web-server`.
// It wires the service from settings and serves it; the root CLI's `serve`
// command does the same.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = configuration::load_settings(None)?;
    let _guard = configuration::init_tracing(&settings.logging);

    let service = jobs::RunService::from_settings(&settings).await?;
    web_server::serve(service, settings.server.addr).await
}
