use waystation::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::from_args();
    waystation::run(config).await;
}