//! Compiler Bridge Language Server
//!
//! Speaks LSP to the editor and forwards work, one job at a time, to an
//! external compiler process. Diagnostics, hover and definitions come back from
//! the compiler and are republished to the editor.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tower_lsp::{LspService, Server};

use compiler_bridge_lsp::backend::Backend;
use compiler_bridge_lsp::config::{BridgeConfig, CompilerSettings};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Compiler executable. If not provided, expects 'compiler' in PATH.
    #[arg(long)]
    compiler: Option<String>,

    /// Argument passed to the compiler (repeatable).
    #[arg(long = "compiler-arg", allow_hyphen_values = true)]
    compiler_args: Vec<String>,

    /// Source label attached to published diagnostics.
    #[arg(long)]
    diagnostics_source: Option<String>,

    /// Communicate over stdin/stdout (default).
    #[arg(long, conflicts_with_all = ["port", "pipe"])]
    stdio: bool,

    /// Connect to the editor on this local TCP port.
    #[arg(long, conflicts_with = "pipe")]
    port: Option<u16>,

    /// Connect to the editor over this Unix domain socket.
    #[arg(long)]
    pipe: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> BridgeConfig {
        let defaults = BridgeConfig::default();
        BridgeConfig {
            compiler: CompilerSettings {
                command: self
                    .compiler
                    .clone()
                    .unwrap_or(defaults.compiler.command),
                args: self.compiler_args.clone(),
                working_directory: None,
            },
            diagnostics_source: self
                .diagnostics_source
                .clone()
                .unwrap_or(defaults.diagnostics_source),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = args.config();

    log::info!("Starting compiler bridge (compiler: {})", config.compiler.command);

    let (service, socket) = LspService::build(move |client| Backend::new(client, config))
        .custom_method("internalReady", Backend::internal_ready)
        .custom_method("apiAddUri", Backend::api_add_uri)
        .custom_method("apiRemUri", Backend::api_rem_uri)
        .finish();

    if let Some(port) = args.port {
        let stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .with_context(|| format!("connecting to editor on port {port}"))?;
        let (read, write) = tokio::io::split(stream);
        Server::new(read, write, socket).serve(service).await;
    } else if let Some(pipe) = args.pipe {
        serve_pipe(&pipe, service, socket).await?;
    } else {
        log::debug!("Serving over stdio (requested explicitly: {})", args.stdio);
        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();
        Server::new(stdin, stdout, socket).serve(service).await;
    }

    log::info!("Editor connection closed");
    Ok(())
}

#[cfg(unix)]
async fn serve_pipe(
    path: &std::path::Path,
    service: LspService<Backend>,
    socket: tower_lsp::ClientSocket,
) -> anyhow::Result<()> {
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .with_context(|| format!("connecting to editor pipe {}", path.display()))?;
    let (read, write) = tokio::io::split(stream);
    Server::new(read, write, socket).serve(service).await;
    Ok(())
}

#[cfg(not(unix))]
async fn serve_pipe(
    path: &std::path::Path,
    _service: LspService<Backend>,
    _socket: tower_lsp::ClientSocket,
) -> anyhow::Result<()> {
    anyhow::bail!("--pipe {} is only supported on Unix", path.display())
}
