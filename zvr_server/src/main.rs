use dotenvy::dotenv;
use log::info;
use zvr_server::{cli::handle_command_line_args, config::ServerConfig, gateways::Gateways, server::run_server};

#[actix_web::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    if handle_command_line_args() {
        return;
    }
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        },
    };

    info!("🚀️ Starting server on {}:{} ({})", config.host, config.port, config.payment_environment);
    match run_server(config, Gateways::unconfigured()).await {
        Ok(_) => println!("Bye!"),
        Err(e) => eprintln!("{e}"),
    }
}
