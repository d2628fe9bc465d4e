//! Command-line interface for poking the Twinkly device directly.
//!
//! Shares `TWINKLY_HOST` and `SIGNAL_TIMEOUT` with the daemon.

use std::env;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;

use xmas_alarm::Config;
use xmas_alarm::signal::{self, Color, Signal, Twinkly};

fn usage() -> ! {
    eprintln!("Usage: xmas-alarm-cli <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  discover           Find the device and print its address");
    eprintln!("  color <r> <g> <b>  Show a static color (0-255 each)");
    eprintln!("  resume             Return to the normal effect");
    eprintln!("  cycle [n]          Cycle red, green, blue n times (default 1)");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  TWINKLY_HOST     Device address (default: UDP broadcast discovery)");
    eprintln!("  SIGNAL_TIMEOUT   Per-request timeout in seconds (default: 5)");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        usage();
    }

    let config = Config::from_env().context("invalid configuration")?;
    let twinkly = Twinkly::new(config.signal)?;

    let command = &args[1];
    match command.as_str() {
        "discover" => cmd_discover(&twinkly).await?,
        "color" => cmd_color(&twinkly, &args[2..]).await?,
        "resume" => {
            twinkly.resume_normal().await?;
            println!("Normal effect restored");
        }
        "cycle" => cmd_cycle(&twinkly, args.get(2)).await?,
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn cmd_discover(twinkly: &Twinkly) -> Result<()> {
    let device = twinkly.discover().await?;
    println!("Host: {}", device.host);
    if let Some(name) = device.name {
        println!("Name: {}", name);
    }
    Ok(())
}

async fn cmd_color(twinkly: &Twinkly, args: &[String]) -> Result<()> {
    let [red, green, blue] = args else {
        bail!("color needs exactly three values: <r> <g> <b>");
    };
    let channel = |name: &str, raw: &str| -> Result<u8> {
        raw.parse()
            .with_context(|| format!("{name} must be 0-255, got {raw:?}"))
    };
    let color = Color::new(
        channel("red", red)?,
        channel("green", green)?,
        channel("blue", blue)?,
    );

    twinkly.set_color(color).await?;
    println!("Color set to {}", color);
    Ok(())
}

async fn cmd_cycle(twinkly: &Twinkly, rounds: Option<&String>) -> Result<()> {
    let rounds = match rounds {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("cycle count must be a number, got {raw:?}"))?,
        None => 1,
    };

    signal::color_cycle(twinkly, Some(rounds), &CancellationToken::new()).await?;
    twinkly.resume_normal().await?;
    Ok(())
}
