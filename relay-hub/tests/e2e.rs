use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use relay_hub::protocol::{LineReader, write_line};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpStream, tcp::OwnedReadHalf},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn terminal_client_chats_with_raw_tcp_peer() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("relay_hub");

    let (mut server_child, mut server_stdout) = spawn_server(&binary).await?;
    let addr = read_server_addr(&mut server_stdout).await?;

    // Drain additional server logs in the background so the pipe never fills.
    let server_log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    let mut terminal = spawn_client(&binary, &addr).await?;
    let welcome = read_line_expect(&mut terminal.stdout, "waiting for welcome").await?;
    let terminal_id = welcome
        .strip_prefix("you are: ")
        .with_context(|| format!("unexpected welcome '{welcome}'"))?
        .to_string();

    let stream = TcpStream::connect(&addr).await?;
    let (reader, mut peer_writer) = stream.into_split();
    let mut peer_reader = LineReader::new(reader, 4096);
    let peer_welcome = read_peer_line(&mut peer_reader).await?;
    let peer_id = peer_welcome
        .strip_prefix("you are: ")
        .context("peer welcome missing")?
        .to_string();

    let arrival = read_line_expect(&mut terminal.stdout, "waiting for peer arrival").await?;
    assert_eq!(arrival, format!("{peer_id} has arrived"));

    terminal
        .send_line("hello from the terminal")
        .await
        .context("terminal send line")?;
    let echo = read_line_expect(&mut terminal.stdout, "waiting for terminal echo").await?;
    assert_eq!(echo, format!("{terminal_id}: hello from the terminal"));
    assert_eq!(
        read_peer_line(&mut peer_reader).await?,
        format!("{terminal_id}: hello from the terminal")
    );

    write_line(&mut peer_writer, "hi back").await?;
    let reply = read_line_expect(&mut terminal.stdout, "waiting for peer reply").await?;
    assert_eq!(reply, format!("{peer_id}: hi back"));

    // Closing stdin ends the client, and the peer hears about it.
    drop(terminal.stdin);
    ensure_success(&mut terminal.child, "terminal client").await?;
    assert_eq!(
        read_peer_line(&mut peer_reader).await?,
        format!("{peer_id}: hi back")
    );
    assert_eq!(
        read_peer_line(&mut peer_reader).await?,
        format!("{terminal_id} has left")
    );

    // Server stays up after clients disconnect; terminate it manually.
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let _ = server_log_task.await;

    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

async fn spawn_server(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("serve")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = read_line(reader)
        .await?
        .context("server did not emit listening address")?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected server banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("server banner missing socket: {trimmed}"));
    }
    Ok(addr.to_string())
}

async fn spawn_client(binary: &Path, addr: &str) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--server")
        .arg(addr)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn client")?;
    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    Ok(ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    })
}

async fn read_peer_line(reader: &mut LineReader<OwnedReadHalf>) -> Result<String> {
    timeout(READ_TIMEOUT, reader.next_line())
        .await
        .context("timed out waiting for peer line")??
        .context("peer connection closed")
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .with_context(|| format!("{name} did not exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
