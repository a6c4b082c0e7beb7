//! The scanner binary: maps the command line onto the typed configuration,
//! wires recorder and client together and runs the registered workers.

use std::path::Path;

use clap::{Arg, Command};

use probe::config::{Config, ConfigItem, ConfigValue};
use probe::error::Error;
use probe::recorder::Recorder;
use probe::registry::WorkerRegistry;

use tlsprobe::client::Client;
use tlsprobe::profile::ServerProfile;
use tlsprobe::workers::{ScanContext, WORKERS};

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("tlsprobe: {}", err);
            match err {
                Error::Config(_) => 2,
                Error::Io(_) => 3,
                Error::Replay(_) => 4,
                _ => 1,
            }
        }
    };
    std::process::exit(exit_code);
}

const VERSION_OPTIONS: [&str; 6] = ["sslv2", "sslv3", "tls10", "tls11", "tls12", "tls13"];

fn cli() -> Command<'static> {
    let mut command = Command::new("tlsprobe")
        .about("TLS server assessment scanner")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("endpoint")
                .required(true)
                .help("host:port of the server to scan"),
        )
        .arg(
            Arg::new("logging")
                .long("logging")
                .takes_value(true)
                .default_value("error")
                .help("log level: error, warning, info, debug"),
        )
        .arg(
            Arg::new("progress")
                .long("progress")
                .help("emit periodic progress to stderr"),
        )
        .arg(
            Arg::new("ca_certs")
                .long("ca-certs")
                .takes_value(true)
                .multiple_values(true)
                .help("extra trust roots"),
        )
        .arg(
            Arg::new("client_key")
                .long("client-key")
                .takes_value(true)
                .help("private key for client certificates"),
        )
        .arg(
            Arg::new("client_chain")
                .long("client-chain")
                .takes_value(true)
                .help("certificate chain for client certificates"),
        )
        .arg(
            Arg::new("read_profile")
                .long("read-profile")
                .takes_value(true)
                .help("load an existing server profile before scanning"),
        )
        .arg(
            Arg::new("write_profile")
                .long("write-profile")
                .takes_value(true)
                .help("dump the server profile to this file"),
        )
        .arg(Arg::new("json").long("json").help("dump the profile to stdout"))
        .arg(
            Arg::new("pytest_recorder_file")
                .long("recorder-file")
                .takes_value(true)
                .help("recording file path"),
        )
        .arg(
            Arg::new("pytest_recorder_replaying")
                .long("recorder-replay")
                .help("replay a recording instead of talking to the network"),
        );
    for option in VERSION_OPTIONS {
        command = command.arg(
            Arg::new(option)
                .long(option)
                .takes_value(true)
                .possible_values(["on", "off"])
                .default_value("on")
                .help("enable or disable this protocol version"),
        );
    }
    command
}

fn build_config() -> Result<Config, Error> {
    let matches = cli().get_matches();

    let mut config = Config::new();
    config.register(ConfigItem::new("endpoint"));
    config.register(ConfigItem::with_default(
        "logging",
        ConfigValue::Str("error".to_string()),
    ));
    config.register(ConfigItem::with_default("progress", ConfigValue::Bool(false)));
    config.register(ConfigItem::path("ca_certs"));
    config.register(ConfigItem::path("client_key"));
    config.register(ConfigItem::path("client_chain"));
    config.register(ConfigItem::path("read_profile"));
    config.register(ConfigItem::path("write_profile"));
    config.register(ConfigItem::with_default("json", ConfigValue::Bool(false)));
    config.register(ConfigItem::path("pytest_recorder_file"));
    config.register(ConfigItem::with_default(
        "pytest_recorder_replaying",
        ConfigValue::Bool(false),
    ));
    for option in VERSION_OPTIONS {
        config.register(ConfigItem::with_default(option, ConfigValue::Bool(true)));
    }

    if let Some(endpoint) = matches.value_of("endpoint") {
        config.set("endpoint", ConfigValue::Str(endpoint.to_string()))?;
    }
    if let Some(level) = matches.value_of("logging") {
        config.set("logging", ConfigValue::Str(level.to_string()))?;
    }
    config.set("progress", ConfigValue::Bool(matches.is_present("progress")))?;
    if let Some(certs) = matches.values_of("ca_certs") {
        config.set(
            "ca_certs",
            ConfigValue::StrList(certs.map(|path| path.to_string()).collect()),
        )?;
    }
    for option in ["client_key", "client_chain", "read_profile", "write_profile"] {
        if let Some(path) = matches.value_of(option) {
            config.set(option, ConfigValue::Str(path.to_string()))?;
        }
    }
    config.set("json", ConfigValue::Bool(matches.is_present("json")))?;
    if let Some(path) = matches.value_of("pytest_recorder_file") {
        config.set("pytest_recorder_file", ConfigValue::Str(path.to_string()))?;
    }
    config.set(
        "pytest_recorder_replaying",
        ConfigValue::Bool(matches.is_present("pytest_recorder_replaying")),
    )?;
    for option in VERSION_OPTIONS {
        if let Some(value) = matches.value_of(option) {
            config.set(option, ConfigValue::Bool(value != "off"))?;
        }
    }
    Ok(config)
}

fn split_endpoint(endpoint: &str) -> Result<(String, u16), Error> {
    let (host, port) = match endpoint.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| Error::Config(format!("invalid port in \"{}\"", endpoint)))?;
            (host.to_string(), port)
        }
        None => (endpoint.to_string(), 443),
    };
    if host.is_empty() {
        return Err(Error::Config(format!("invalid endpoint \"{}\"", endpoint)));
    }
    Ok((host, port))
}

fn run() -> Result<(), Error> {
    let config = build_config()?;
    probe::logging::init(config.get_str("logging").unwrap_or("error"))?;

    let endpoint = config
        .get_str("endpoint")
        .ok_or_else(|| Error::Config("no endpoint given".to_string()))?;
    let (host, port) = split_endpoint(endpoint)?;

    let recorder = Recorder::shared();
    let recorder_file = config.get_str("pytest_recorder_file").map(|path| path.to_string());
    let replaying = config.get_bool("pytest_recorder_replaying");
    match (&recorder_file, replaying) {
        (Some(path), true) => {
            recorder.borrow_mut().deserialize(Path::new(path))?;
            recorder.borrow_mut().replay();
        }
        (Some(_), false) => recorder.borrow_mut().record(),
        (None, true) => {
            return Err(Error::Config(
                "replaying requires a recording file".to_string(),
            ));
        }
        (None, false) => {}
    }

    let server_profile = match config.get_str("read_profile") {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str::<ServerProfile>(&text)
                .map_err(|err| Error::Config(format!("server profile {}: {}", path, err)))?
        }
        None => ServerProfile::new(),
    };

    let mut ctx = ScanContext {
        client: Client::new(host, port, recorder.clone()),
        server_profile,
        config,
        recorder: recorder.clone(),
    };

    let mut registry = WorkerRegistry::new(WORKERS);
    registry.run(&mut ctx)?;

    if let (Some(path), false) = (&recorder_file, replaying) {
        recorder.borrow_mut().serialize(Path::new(path))?;
    }

    let dump = serde_json::to_string_pretty(&ctx.server_profile)
        .map_err(|err| Error::Io(err.to_string()))?;
    if let Some(path) = ctx.config.get_str("write_profile") {
        std::fs::write(path, &dump)?;
    }
    if ctx.config.get_bool("json") {
        println!("{}", dump);
    }
    Ok(())
}
