use std::env;

use orkli_thermostat::{parse_roster, Event, OrkliClient};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> orkli_thermostat::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let (Some(host), Some(roster_path)) = (args.get(1), args.get(2)) else {
        eprintln!("usage: monitor <host> <Instal.dat>");
        std::process::exit(2);
    };

    let text = std::fs::read_to_string(roster_path)?;
    let devices = parse_roster(&text, &orkli_thermostat::controller_name(host))?;
    println!("Loaded {} zones from {roster_path}", devices.len());

    let client = OrkliClient::builder(host.as_str())
        .devices(devices)
        .on_event(|event| match event {
            Event::CurrentTemperatureChanged { name, raw, .. } => {
                println!("[{name}] current {:.1}\u{00b0}C", f64::from(*raw) / 2.0);
            }
            Event::TargetTemperatureChanged { name, raw, .. } => {
                println!("[{name}] target {:.1}\u{00b0}C", f64::from(*raw) / 2.0);
            }
            other => println!("{other:?}"),
        })
        .build()?;

    println!("Connecting to {host}...");
    client.first_refresh().await?;
    println!("Connected. Polling every {:?}...", client.scan_interval());

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    client.run(cancel).await;
    client.disconnect().await;
    Ok(())
}
