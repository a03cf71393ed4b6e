//! Asks fingerd about root.
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{connect, within};
use crate::error::{Error, Result};

const QUERY: &[u8] = b"root\r\n";

pub async fn grab(
    target: SocketAddr,
    connect_timeout: Duration,
    deadline: Duration,
) -> Result<Option<String>> {
    let mut stream = connect(target, connect_timeout).await?;
    within(target, deadline, stream.write_all(QUERY)).await?;

    let mut buf = vec![0u8; 4096];
    let n = within(target, deadline, stream.read(&mut buf)).await?;
    if n == 0 {
        return Err(Error::Closed { target });
    }

    Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn sends_root_query() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut query = [0u8; 6];
            sock.read_exact(&mut query).await.unwrap();
            sock.write_all(b"Login: root\t\t\tName: Charlie Root\r\n")
                .await
                .unwrap();
            query
        });

        let banner = grab(addr, Duration::from_secs(2), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&server.await.unwrap(), QUERY);
        assert_eq!(
            banner.as_deref(),
            Some("Login: root\t\t\tName: Charlie Root\r\n")
        );
    }
}
