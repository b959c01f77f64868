use std::net::SocketAddr;

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
};
use tracing::{info, warn};

use gateway_common::{ClientCommand, CommandError, Reply};

use crate::owner::PendingCommand;

const UNAVAILABLE: &str = "Controller unavailable";
const TOO_LONG: &str = "Command too long";
const MAX_LINE_BYTES: u64 = 256;

enum ClientLine {
    Text(String),
    TooLong,
    Closed,
}

pub async fn serve(
    listener: TcpListener,
    commands: mpsc::Sender<PendingCommand>,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "client connected");
        let commands = commands.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_client(stream, peer, commands).await {
                warn!(%peer, "client connection error: {err}");
            }
            info!(%peer, "client disconnected");
        });
    }
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    commands: mpsc::Sender<PendingCommand>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let line = match next_line(&mut reader).await? {
            ClientLine::Text(line) => line,
            ClientLine::TooLong => {
                warn!(%peer, "dropping command longer than {MAX_LINE_BYTES} bytes");
                writer.write_all(format!("{TOO_LONG}\n").as_bytes()).await?;
                continue;
            }
            ClientLine::Closed => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        info!(%peer, "RX socket {line}");

        let response = match line.parse::<ClientCommand>() {
            Err(err) => Some(err.to_string()),
            Ok(command) => match submit(&commands, command).await {
                Some(Ok(Reply::Text(text))) => Some(text),
                Some(Ok(Reply::Silent)) => None,
                Some(Ok(Reply::Disconnect)) => break,
                Some(Err(err)) => Some(err.to_string()),
                None => Some(UNAVAILABLE.to_string()),
            },
        };

        if let Some(response) = response {
            writer.write_all(format!("{response}\n").as_bytes()).await?;
        }
    }

    writer.shutdown().await
}

/// Reads up to the next newline, holding at most `MAX_LINE_BYTES` at a time.
/// The rest of an overlong line is read and discarded.
async fn next_line<R>(reader: &mut R) -> std::io::Result<ClientLine>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 {
        return Ok(ClientLine::Closed);
    }
    if buf.last() == Some(&b'\n') || (read as u64) < MAX_LINE_BYTES {
        return Ok(ClientLine::Text(String::from_utf8_lossy(&buf).into_owned()));
    }

    loop {
        buf.clear();
        let read = (&mut *reader)
            .take(MAX_LINE_BYTES)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 || buf.last() == Some(&b'\n') {
            return Ok(ClientLine::TooLong);
        }
    }
}

async fn submit(
    commands: &mpsc::Sender<PendingCommand>,
    command: ClientCommand,
) -> Option<Result<Reply, CommandError>> {
    let (reply, response) = oneshot::channel();
    commands
        .send(PendingCommand { command, reply })
        .await
        .ok()?;
    response.await.ok()
}
