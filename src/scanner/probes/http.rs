//! Sends `HEAD /` and keeps whatever the `Server` header says.
use std::net::SocketAddr;
use std::time::Duration;

use reqwest::header::SERVER;
use reqwest::redirect::Policy;
use reqwest::Client;

use super::chomp;
use crate::error::Result;

pub fn client(timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .timeout(timeout)
        .no_proxy()
        .redirect(Policy::none())
        .build()?;
    Ok(client)
}

pub async fn grab(client: &Client, target: SocketAddr) -> Result<Option<String>> {
    let url = format!("http://{target}/");
    let response = client.head(&url).send().await?;

    let server = response
        .headers()
        .get(SERVER)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

    Ok(server.map(|s| chomp(&s).to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve(response: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let n = sock.read(&mut buf).await.unwrap();
            assert!(buf[..n].starts_with(b"HEAD / HTTP/1.1\r\n"));
            sock.write_all(response.as_bytes()).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn reports_server_header() {
        let addr = serve(
            "HTTP/1.1 200 OK\r\nServer: Apache/2.0.47 (Ubuntu)\r\nContent-Length: 0\r\n\r\n",
        )
        .await;
        let client = client(Duration::from_secs(2)).unwrap();
        let banner = grab(&client, addr).await.unwrap();
        assert_eq!(banner.as_deref(), Some("Apache/2.0.47 (Ubuntu)"));
    }

    #[tokio::test]
    async fn missing_server_header_is_no_banner() {
        let addr = serve("HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n").await;
        let client = client(Duration::from_secs(2)).unwrap();
        assert_eq!(grab(&client, addr).await.unwrap(), None);
    }

    #[tokio::test]
    async fn redirects_are_not_followed() {
        let addr = serve(
            "HTTP/1.1 301 Moved Permanently\r\nLocation: http://192.0.2.1/\r\nServer: nginx\r\nContent-Length: 0\r\n\r\n",
        )
        .await;
        let client = client(Duration::from_secs(2)).unwrap();
        assert_eq!(grab(&client, addr).await.unwrap().as_deref(), Some("nginx"));
    }
}
