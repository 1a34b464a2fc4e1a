use mumeproxy::cli::{self, ConfigFile};
use mumeproxy::config::Config;
use mumeproxy::proxy;

#[tokio::main]
async fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("mumeproxy: {e}");
            eprintln!();
            eprintln!("Usage: mumeproxy [-f<config>] [-i<addr>] [-p<port>] [-H<host>] [-P<port>]");
            eprintln!("                 [-x] [-o<format>] [-t<terminator>] [-e] [--find-format=<fmt>]");
            std::process::exit(1);
        }
    };

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let mut config = match &args.config {
        ConfigFile::Skip => Config::new(),
        ConfigFile::Explicit(path) => match Config::load_file(path) {
            Ok((config, errors)) => {
                for e in &errors {
                    log::warn!("{}: {e}", path.display());
                }
                config
            }
            Err(e) => {
                eprintln!("mumeproxy: can't read {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        ConfigFile::Search => match cli::find_user_config() {
            Some(path) => match Config::load_file(&path) {
                Ok((config, errors)) => {
                    for e in &errors {
                        log::warn!("{}: {e}", path.display());
                    }
                    config
                }
                Err(e) => {
                    eprintln!("mumeproxy: can't read {}: {e}", path.display());
                    std::process::exit(1);
                }
            },
            None => Config::new(),
        },
    };

    // CLI flags override the config file.
    if let Some(interface) = args.interface {
        config.interface = interface;
    }
    if let Some(port) = args.local_port {
        config.local_port = port;
    }
    if let Some(host) = args.remote_host {
        config.remote_host = host;
    }
    if let Some(port) = args.remote_port {
        config.remote_port = port;
    }
    if args.tls {
        config.tls = true;
    }
    if let Some(format) = args.output_format {
        config.output_format = format;
    }
    if let Some(terminator) = args.prompt_terminator {
        config.prompt_terminator = terminator;
    }
    if args.emulation_mode {
        config.emulation_mode = true;
    }

    log::info!(
        "mumeproxy starting: {}:{} -> {}:{} (tls={})",
        config.interface,
        config.local_port,
        config.remote_host,
        config.remote_port,
        config.tls
    );

    if let Err(e) = proxy::run(config).await {
        eprintln!("mumeproxy: {e}");
        std::process::exit(1);
    }
}
