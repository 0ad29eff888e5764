//! End-to-end tests over a loopback TCP connection

mod common;

use common::*;
use slackircd_core::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

struct Gateway {
    addr: std::net::SocketAddr,
    registry: Arc<SessionRegistry>,
    workspace: Arc<MockWorkspace>,
}

async fn start_gateway() -> Gateway {
    let mut config = Config::default();
    config.server.name = SERVER.to_string();
    config.server.motd = vec!["First line".to_string(), "Second line".to_string()];
    config.workspace.pagination = 2;

    let workspace = Arc::new(MockWorkspace::standard());
    let connector = Arc::new(MockConnector::new(workspace.clone()));
    let mut server = Server::new(config, connector);
    server.init().await.unwrap();
    let registry = server.registry();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.serve(listener).await });

    Gateway {
        addr,
        registry,
        workspace,
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    async fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for the gateway")
            .unwrap();
        assert!(read > 0, "connection closed");
        assert!(line.ends_with("\r\n"), "unterminated line {:?}", line);
        line.trim_end().to_string()
    }
}

#[tokio::test]
async fn test_login_over_tcp() {
    let gateway = start_gateway().await;
    let mut client = Client::connect(gateway.addr).await;
    client
        .send("PASS token\r\nNICK x\r\nUSER x 0 * :X\r\n")
        .await;

    assert_eq!(client.line().await, ":irc.test 001 alice :Welcome to the irc.test IRC chat, alice!");
    assert_eq!(client.line().await, ":irc.test 375 alice :");
    assert_eq!(client.line().await, ":irc.test 372 alice :First line");
    assert_eq!(client.line().await, ":irc.test 372 alice :Second line");
    assert_eq!(client.line().await, ":irc.test 372 alice :Workspace team: Wonderland");
    assert_eq!(client.line().await, ":irc.test 376 alice :");

    for (channel, topic) in [("general", "General chat"), ("random", "Off topic"), ("secret", "")] {
        assert_eq!(client.line().await, format!(":alice!alice@irc.test JOIN #{}", channel));
        assert_eq!(client.line().await, format!(":irc.test 332 alice #{} :{}", channel, topic));
        assert!(client
            .line()
            .await
            .starts_with(&format!(":irc.test 353 alice = #{} :alice", channel)));
        assert_eq!(
            client.line().await,
            format!(":irc.test 366 alice #{} :End of NAMES list", channel)
        );
    }

    assert_eq!(
        client.line().await,
        ":irc.test 043 x :Your nickname is alice and cannot be changed"
    );
    assert_eq!(gateway.registry.len(), 1);

    client.send("PRIVMSG #general :hello\r\n").await;
    let workspace = gateway.workspace.clone();
    eventually(|| !workspace.posts().is_empty()).await;
    assert_eq!(
        workspace.posts()[0],
        (MessageTarget::Channel("general".to_string()), "hello".to_string())
    );
}

#[tokio::test]
async fn test_bad_lines_are_discarded() {
    let gateway = start_gateway().await;
    let mut client = Client::connect(gateway.addr).await;

    client.send("FOO bar\r\n").await;
    client.send("PING abc\n").await;
    client.send("\r\n").await;
    client.send("ping lower\r\n").await;
    client.send("PING def\r\n").await;
    assert_eq!(client.line().await, "PONG def");
}

#[tokio::test]
async fn test_disconnect_removes_session() {
    let gateway = start_gateway().await;
    let mut client = Client::connect(gateway.addr).await;
    client.send("PING first\r\n").await;
    assert_eq!(client.line().await, "PONG first");
    assert_eq!(gateway.registry.len(), 1);

    drop(client);
    let registry = gateway.registry.clone();
    eventually(|| registry.is_empty()).await;
}

#[tokio::test]
async fn test_quit_closes_connection() {
    let gateway = start_gateway().await;
    let mut client = Client::connect(gateway.addr).await;
    client.send("PING first\r\n").await;
    assert_eq!(client.line().await, "PONG first");

    client.send("QUIT :bye\r\n").await;
    let mut rest = String::new();
    let read = tokio::time::timeout(Duration::from_secs(2), client.reader.read_line(&mut rest))
        .await
        .expect("connection stayed open")
        .unwrap();
    assert_eq!(read, 0);

    let registry = gateway.registry.clone();
    eventually(|| registry.is_empty()).await;
}
