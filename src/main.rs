//! Binary entry point for the vmtest CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing::info;

use vmtest::remote::{
    Login, RemoteCommand, RemoteError, RemoteExecutor, SshConfig, StreamingCommandRunner,
    expand_tilde,
};
use vmtest::vm::{CloudVm, QemuOptions, QemuStart, QemuVm, Vm, VmError, WaitMode, with_vm};
use vmtest::{ScalewayBackend, ScalewayConfig, logging};

mod cli;

use cli::{Cli, CloudCommand, QemuCommand, SessionArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
    #[error("invalid --copy value '{0}': expected SRC:DST")]
    InvalidCopy(String),
    #[error(transparent)]
    Vm(#[from] VmError),
}

/// A local file to place on the guest.
#[derive(Debug, Eq, PartialEq)]
struct CopySpec {
    src: Utf8PathBuf,
    dst: String,
}

/// Everything done on the guest once it is up.
#[derive(Debug)]
struct Session {
    login: Login,
    copies: Vec<CopySpec>,
    command: Option<RemoteCommand>,
}

impl Session {
    fn from_args(args: SessionArgs) -> Result<Self, CliError> {
        validate_command_args(&args.command)?;
        let login = match (args.password, args.keyfile) {
            (Some(password), _) => Login::with_password(args.user, password),
            (None, Some(keyfile)) => Login::with_key_file(args.user, expand_tilde(&keyfile)),
            (None, None) => Login::new(args.user),
        };
        let copies = args
            .copy
            .iter()
            .map(String::as_str)
            .map(parse_copy)
            .collect::<Result<Vec<_>, _>>()?;
        let command = (!args.command.is_empty()).then(|| RemoteCommand::from(args.command));
        Ok(Self {
            login,
            copies,
            command,
        })
    }

    const fn is_empty(&self) -> bool {
        self.copies.is_empty() && self.command.is_none()
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = logging::init() {
        writeln!(io::stderr(), "failed to initialise logging: {err}").ok();
    }
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Qemu(command) => qemu_command(command).await,
        Cli::Cloud(command) => cloud_command(command).await,
    }
}

fn executor() -> Result<RemoteExecutor<StreamingCommandRunner>, CliError> {
    let config =
        SshConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    RemoteExecutor::with_process_runner(config).map_err(|err| CliError::Config(err.to_string()))
}

async fn qemu_command(args: QemuCommand) -> Result<i32, CliError> {
    let wait: WaitMode = args.wait.parse()?;
    let start = QemuStart {
        wait: wait.clone(),
        snapshot: !args.no_snapshot,
        use_firmware: args.firmware,
    };
    let options = QemuOptions {
        image: Utf8PathBuf::from(expand_tilde(&args.image)),
        arch: args.arch,
        cdrom: args.cdrom.map(|path| Utf8PathBuf::from(expand_tilde(&path))),
        extra_args: args.qemu_args,
        memory: args.memory,
        gui: args.gui,
        binary: args.qemu_bin,
    };
    let session = Session::from_args(args.session)?;
    let vm = QemuVm::new(options, executor()?)?;

    let code = with_vm(vm, async |vm: &mut QemuVm| -> Result<i32, VmError> {
        vm.start_with(start).await?;
        if matches!(wait, WaitMode::QmpEvent(_)) && session.is_empty() {
            return Ok(0);
        }
        run_session(vm, &session).await
    })
    .await?;
    Ok(code)
}

async fn cloud_command(args: CloudCommand) -> Result<i32, CliError> {
    let mut config =
        ScalewayConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    if let Some(image) = args.image {
        config.image = image;
    }
    if let Some(instance_type) = args.instance_type {
        config.instance_type = instance_type;
    }
    let backend = ScalewayBackend::new(config).map_err(|err| CliError::Backend(err.to_string()))?;
    let request = backend
        .default_request()
        .map_err(|err| CliError::Backend(err.to_string()))?;
    let session = Session::from_args(args.session)?;
    let vm = CloudVm::new(backend, request, executor()?);

    let code = with_vm(
        vm,
        async |vm: &mut CloudVm<ScalewayBackend>| -> Result<i32, VmError> {
            run_session(vm, &session).await
        },
    )
    .await?;
    Ok(code)
}

/// Copies files, then runs the command; the remote exit status becomes the
/// process exit status.
async fn run_session<V: Vm>(vm: &mut V, session: &Session) -> Result<i32, VmError> {
    for copy in &session.copies {
        vm.scp(&copy.src, &copy.dst, &session.login).await?;
        info!(src = %copy.src, dst = %copy.dst, "copied file to guest");
    }
    let Some(command) = &session.command else {
        let endpoint = vm.prepare(&session.login).await?;
        info!(host = %endpoint.host, port = endpoint.port, "guest ready");
        return Ok(0);
    };
    match vm.run(command, &session.login).await {
        Ok(_) => Ok(0),
        Err(VmError::Remote(RemoteError::CommandFailed {
            exit_code: Some(code),
            ..
        })) => Ok(code),
        Err(err) => Err(err),
    }
}

fn parse_copy(value: &str) -> Result<CopySpec, CliError> {
    match value.split_once(':') {
        Some((src, dst)) if !src.is_empty() && !dst.is_empty() => Ok(CopySpec {
            src: Utf8PathBuf::from(expand_tilde(src)),
            dst: dst.to_owned(),
        }),
        _ => Err(CliError::InvalidCopy(value.to_owned())),
    }
}

fn validate_command_args(args: &[String]) -> Result<(), CliError> {
    for arg in args {
        if arg
            .chars()
            .any(|ch| matches!(ch, '\n' | '\r' | '\u{0000}'..='\u{001F}' | '\u{007F}'))
        {
            return Err(CliError::InvalidCommand(String::from(concat!(
                "command arguments must not contain control characters (ASCII ",
                "0x00-0x1F or 0x7F, e.g. newline, carriage return, tab, NUL)"
            ))));
        }
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
