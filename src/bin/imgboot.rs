use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use imgboot::config::{default_config_path, load_config};
use imgboot::docker::DockerPi;
use imgboot::os::known::ALL;
use imgboot::preflight;
use imgboot::status::ConsoleSink;
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    "Usage:\n  imgboot run [<session.toml>]\n  imgboot os list\n  imgboot check"
}

fn main() -> Result<()> {
    // RUST_LOG=imgboot=debug shows every program step
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [run] if run == "run" => {
            let config_path = default_config_path().context("no config directory on this platform")?;
            run_session(&config_path)
        }
        [run, config] if run == "run" => run_session(Path::new(config)),
        [os, list] if os == "os" && list == "list" => {
            list_operating_systems();
            Ok(())
        }
        [check] if check == "check" => check_host(),
        _ => bail!(usage()),
    }
}

fn run_session(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    preflight::check_host().context("preflight checks failed")?;

    let spawner = DockerPi::new()?;
    let sink = Arc::new(ConsoleSink::new(config.verbose));
    let code = imgboot::boot_and_run(&config, &spawner, sink)
        .with_context(|| format!("booting '{}'", config.image.display()))?;

    if code != 0 {
        bail!("{} exited with code {}", config.os, code);
    }
    eprintln!("{} shut down cleanly", config.os);
    Ok(())
}

fn list_operating_systems() {
    for os in ALL {
        let descriptor = os.descriptor();
        let login = if descriptor.default_credentials.is_empty() {
            "no login".to_string()
        } else {
            format!(
                "{}:{}",
                descriptor.default_credentials.username, descriptor.default_credentials.password
            )
        };
        println!("{:<20} {:<40} {}", os.id(), descriptor.full_name, login);
    }
}

fn check_host() -> Result<()> {
    preflight::check_host()?;
    let config_hint = default_config_path()
        .map(PathBuf::into_os_string)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "(none)".to_string());
    println!("Host ready. Default session config: {}", config_hint);
    Ok(())
}
