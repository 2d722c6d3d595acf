// src/main.rs
use clap::{Args as ClapArgs, Parser, Subcommand};
use kubeconfig_step::config::{read_ca_certificate, BindingSpec, StepConfig};
use kubeconfig_step::credentials::store::resolve_path;
use kubeconfig_step::credentials::{resolve_credentials, FileCredentialStore};
use kubeconfig_step::error::StepError;
use kubeconfig_step::step::{CancelToken, StepRunner, CANCELLED_EXIT_CODE};
use kubeconfig_step::utils::logging::{ConsoleLogger, FileLogger, Logger, MultiLogger};
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Credential store file (YAML or JSON)
    #[arg(long, global = true, env = "KUBECONFIG_STEP_CREDENTIALS")]
    pub credentials: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "KUBECONFIG_STEP_LOG_LEVEL")]
    pub log_level: String,

    /// Also append build log messages to this file
    #[arg(long, global = true)]
    pub log_file: Option<String>,

    /// Show debug messages in the build log
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Which credentials to bind: a step file, or a single credential given
/// inline.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct BindingArgs {
    /// Step definition file listing the bindings
    #[arg(short, long)]
    pub step: Option<PathBuf>,

    /// Bind a single credential
    #[arg(long, conflicts_with = "step")]
    pub credentials_id: Option<String>,

    #[arg(long, requires = "credentials_id")]
    pub server_url: Option<String>,

    #[arg(long, requires = "credentials_id")]
    pub cluster_name: Option<String>,

    #[arg(long, requires = "credentials_id")]
    pub context_name: Option<String>,

    #[arg(long, requires = "credentials_id")]
    pub user_name: Option<String>,

    #[arg(long, requires = "credentials_id")]
    pub namespace: Option<String>,

    /// CA certificate, as a PEM file path or inline PEM
    #[arg(long, requires = "credentials_id")]
    pub ca_certificate: Option<String>,

    /// Environment variable that receives the kubeconfig path
    #[arg(long)]
    pub env_var: Option<String>,

    /// Context to select, instead of the one picked from the bindings
    #[arg(long)]
    pub current_context: Option<String>,

    /// Fail when two credentials define the same name
    #[arg(long)]
    pub strict: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the merged kubeconfig
    Render {
        #[command(flatten)]
        binding: BindingArgs,

        /// Write to this file (mode 0600) instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a command with the merged kubeconfig exposed
    Exec {
        #[command(flatten)]
        binding: BindingArgs,

        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

impl BindingArgs {
    fn to_step_config(&self) -> Result<StepConfig, StepError> {
        let mut config = match (&self.step, &self.credentials_id) {
            (Some(path), _) => StepConfig::load_from_file(path)?,
            (None, Some(id)) => StepConfig {
                bindings: vec![BindingSpec {
                    credentials_id: id.clone(),
                    server_url: self.server_url.clone(),
                    context_name: self.context_name.clone(),
                    cluster_name: self.cluster_name.clone(),
                    user_name: self.user_name.clone(),
                    namespace: self.namespace.clone(),
                    ca_certificate: self
                        .ca_certificate
                        .as_deref()
                        .map(|ca| read_ca_certificate(ca, None))
                        .transpose()?,
                }],
                ..StepConfig::default()
            },
            (None, None) => {
                return Err(StepError::InvalidStep(
                    "either --step or --credentials-id is required".to_string(),
                ))
            }
        };

        if let Some(env_var) = &self.env_var {
            config.env_var = env_var.clone();
        }
        if self.current_context.is_some() {
            config.current_context = self.current_context.clone();
        }
        config.strict |= self.strict;

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(log_level: &str) -> Result<(), String> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| format!("Failed to initialize log filter: {}", e))?;

    // stdout carries rendered kubeconfigs and the child's output
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    Ok(())
}

fn build_logger(args: &Args) -> io::Result<Box<dyn Logger>> {
    let console = ConsoleLogger::new(args.debug);
    match &args.log_file {
        Some(path) => {
            let file = FileLogger::new(path, args.debug)?;
            let loggers: Vec<Box<dyn Logger>> = vec![Box::new(console), Box::new(file)];
            Ok(Box::new(MultiLogger::new(loggers)))
        }
        None => Ok(Box::new(console)),
    }
}

fn default_store_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("kubeconfig-step").join("credentials.yaml"))
}

fn load_store(args: &Args) -> Result<FileCredentialStore, StepError> {
    let path = match &args.credentials {
        Some(path) => resolve_path(path, None),
        None => default_store_path().ok_or_else(|| {
            StepError::InvalidStep("no credential store given and no config directory".to_string())
        })?,
    };
    debug!("using credential store {}", path.display());
    FileCredentialStore::load_from_file(&path)
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;

    // mode() only applies to new files; narrow an existing one before
    // anything is written to it.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)?;
    file.sync_all()
}

fn run(args: Args) -> Result<i32, StepError> {
    let mut logger = build_logger(&args)?;
    let store = load_store(&args)?;

    match &args.command {
        Command::Render { binding, output } => {
            let step = binding.to_step_config()?;
            let bindings = resolve_credentials(&store, &step.bindings)?;
            let contents = StepRunner::from_config(&step).render(&bindings)?;

            match output {
                Some(path) => {
                    write_private(path, &contents)?;
                    logger.log(&format!("kubectl configuration written to {}", path.display()));
                }
                None => io::stdout().write_all(&contents)?,
            }
            Ok(0)
        }
        Command::Exec { binding, command } => {
            let step = binding.to_step_config()?;
            let bindings = resolve_credentials(&store, &step.bindings)?;

            let cancel = CancelToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || handler_token.cancel())
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

            let runner = StepRunner::from_config(&step).with_cancel_token(cancel);
            runner.run(&bindings, command, logger.as_mut())
        }
    }
}

fn main() {
    let args = Args::parse();

    if let Err(e) = init_tracing(&args.log_level) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let code = match run(args) {
        Ok(code) => code,
        Err(StepError::Cancelled) => {
            error!("step was cancelled");
            CANCELLED_EXIT_CODE
        }
        Err(e) => {
            error!("{}", e);
            1
        }
    };
    std::process::exit(code);
}
