use clap::Parser;
use log::{error, info};
use plankton::application_state::{init_config, AppInitErr, ApplicationState};
use plankton::capture::list_interfaces;
use plankton::cli::{Args, Command};

#[actix_web::main]
async fn main() -> Result<(), AppInitErr> {
    // Setup logger
    let env = env_logger::Env::default();
    env_logger::init_from_env(env);

    match Args::parse().command() {
        Command::Interfaces => match list_interfaces() {
            Ok(names) => {
                for name in names {
                    println!("{}", name);
                }
                Ok(())
            }
            Err(e) => {
                error!("unable to list interfaces: {}", e);
                Err(AppInitErr::Capture(e))
            }
        },
        Command::Run { config } => {
            let (config_cache, _) = init_config(&config)?;
            info!("loaded configuration from {}", config_cache.path());

            let app_state = ApplicationState::new(config_cache);
            let configuration = app_state.config().map_err(AppInitErr::Config)?;

            ApplicationState::init_components(configuration).await
        }
    }
}
