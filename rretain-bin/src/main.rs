#![deny(unsafe_code)]

use std::time::Duration;

use rretain::logger::{config_logger, logger_init};
use rretain::Retainer;
use rretain_conf::{Options, Settings};
use structopt::StructOpt;

#[tokio::main]
async fn main() {
    //init config
    let settings = Settings::init(Options::from_args()).expect("settings init failed");

    //init log
    let logger = config_logger(&settings.log.filename(), settings.log.to, settings.log.level)
        .expect("logger config failed");
    logger_init(logger, settings.log.level).expect("logger init failed");

    settings.logs();

    let retainer = Retainer::new(settings.clone()).expect("retainer init failed");
    retainer.start_maintenance();

    //start gRPC server
    if let Err(e) = retainer.listen_and_serve().await {
        log::error!("listen cluster gRPC failed: {:?}", e);
        std::process::exit(1);
    }

    //connect to peers
    match retainer.connect_peers().await {
        Ok(n) => log::info!("{} peers registered", n),
        Err(e) => {
            log::error!("connect peers failed: {:?}", e);
            std::process::exit(1);
        }
    }

    log::info!("rretaind started, node {}, {}", retainer.node_id(), retainer.attrs());

    tokio::signal::ctrl_c().await.expect("signal ctrl c");
    log::info!("rretaind stopping, {}", serde_json::to_string(&retainer.attrs()).unwrap_or_default());
    tokio::time::sleep(Duration::from_secs(1)).await;
}
