use std::future::Future;

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    config::DEFAULT_MAX_LINE_BYTES,
    protocol::{LineReader, write_line},
};

/// Copies stdin lines to the relay and relay lines to stdout until either
/// side closes.
pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;
    let mut stdin = LineReader::new(io::stdin(), DEFAULT_MAX_LINE_BYTES);
    let mut stdout = io::stdout();

    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(?error, "ctrl-c handler failed");
        }
    };

    run_client_loop(&mut reader, &mut writer, &mut stdin, &mut stdout, ctrl_c).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(LineReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((LineReader::new(reader, DEFAULT_MAX_LINE_BYTES), writer))
}

/// Both line readers keep partial input buffered, so whichever branch loses a
/// round of `select!` picks up where it left off.
async fn run_client_loop<R, W, I, O, F>(
    server: &mut LineReader<R>,
    writer: &mut W,
    input: &mut LineReader<I>,
    output: &mut O,
    shutdown: F,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        select! {
            server_line = server.next_line() => {
                if !handle_server_line(server_line, output).await? {
                    break;
                }
            }
            input_line = input.next_line() => {
                if !handle_input_line(input_line, writer).await? {
                    break;
                }
            }
            _ = &mut shutdown => break,
        }
    }
    Ok(())
}

async fn handle_server_line<O>(line: io::Result<Option<String>>, output: &mut O) -> Result<bool>
where
    O: AsyncWrite + Unpin,
{
    match line? {
        Some(line) => {
            write_line(output, &line).await?;
            Ok(true)
        }
        None => {
            info!("relay closed the connection");
            Ok(false)
        }
    }
}

async fn handle_input_line<W>(line: io::Result<Option<String>>, writer: &mut W) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let Some(line) = line? else {
        return Ok(false);
    };

    write_line(writer, &line)
        .await
        .context("failed to send line")?;
    Ok(true)
}

async fn shutdown_connection<W>(writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}
