use crate::*;
use kestrel_rpc_core::error::{RpcError, RpcIntErr};
use kestrel_rpc_core::message::ServiceKey;
use kestrel_rpc_stream::client::{ClientConfig, RpcClient, ServiceProxy};
use kestrel_rpc_stream::registry::LocalRegistry;
use kestrel_rpc_stream::server::ServerConfig;
use log::*;
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[logfn]
#[rstest]
fn test_service_not_found(runner: TestRunner) {
    runner.block_on(async move {
        let local = Arc::new(LocalRegistry::default());
        let ext = kestrel_rpc_stream::default_extensions_with(local.clone());
        let (_server, hello, addr) = init_server(ServerConfig::default(), ext.clone()).await;
        // Announced but never published on the server
        let missing = ServiceKey::new("Missing", "test1", "version1");
        local.add(&missing.to_string(), addr);

        let client = init_client(ClientConfig::default(), ext);
        let e = ServiceProxy::new(client.clone(), missing).call("hello", vec![json!("a")]).await.unwrap_err();
        assert_eq!(e.kind(), RpcIntErr::Service);
        match &e {
            RpcError::Remote(fault) => assert!(fault.message.contains("Missingtest1version1"), "{}", fault),
            _ => panic!("unexpected {}", e),
        }
        let conn = client.get_conn(addr).await.expect("conn");
        assert!(!conn.is_closed());

        // The connection is reused
        let proxy = ServiceProxy::new(client.clone(), hello_key());
        assert_eq!(proxy.call("hello", vec![json!("a")]).await.expect("call"), json!("Hello a"));
        assert!(Arc::ptr_eq(&conn, &client.get_conn(addr).await.expect("conn")));
        assert_eq!(hello.invoked(), 1);
    });
}

#[logfn]
#[rstest]
fn test_method_and_invocation_errors(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let (_server, _hello, _addr) = init_server(ServerConfig::default(), ext.clone()).await;
        let client = init_client(ClientConfig::default(), ext);
        let proxy = ServiceProxy::new(client, hello_key());

        let e = proxy.call("bye", vec![]).await.unwrap_err();
        assert_eq!(e.kind(), RpcIntErr::Method);
        assert!(!e.kind().is_retriable());

        let e = proxy.call("fail", vec![]).await.unwrap_err();
        assert_eq!(e.kind(), RpcIntErr::Invocation);
        assert!(e.to_string().contains("intended failure"), "{}", e);

        // Bad arguments fail inside the service
        let e = proxy.call("greet", vec![json!(1)]).await.unwrap_err();
        assert_eq!(e.kind(), RpcIntErr::Invocation);

        assert_eq!(proxy.call("hello", vec![json!("ok")]).await.expect("call"), json!("Hello ok"));
    });
}

#[logfn]
#[rstest]
fn test_no_instance(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let client = init_client(ClientConfig::default(), ext);
        let proxy = ServiceProxy::new(client.clone(), hello_key());
        let e = proxy.call("hello", vec![json!("a")]).await.unwrap_err();
        assert_eq!(e, RpcIntErr::NoInstance);
        assert_eq!(client.conn_count(), 0);
    });
}

#[logfn]
#[rstest]
fn test_unknown_extension(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let (_server, _hello, _addr) = init_server(ServerConfig::default(), ext.clone()).await;

        let config = ClientConfig { balancer: "least_active".to_string(), ..Default::default() };
        let e = RpcClient::new(config, ext.clone()).unwrap_err();
        assert_eq!(e.kind(), RpcIntErr::Extension);

        let config = ClientConfig { serializer: "kryo".to_string(), ..Default::default() };
        let client = init_client(config, ext);
        let e = ServiceProxy::new(client, hello_key()).call("hello", vec![json!("a")]).await.unwrap_err();
        assert_eq!(e.kind(), RpcIntErr::Extension);
        info!("unknown extension: {}", e);
    });
}

#[logfn]
#[rstest]
fn test_overloaded(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let server_config = ServerConfig { worker_count: 1, worker_queue: 1, ..Default::default() };
        let (_server, _hello, _addr) = init_server(server_config, ext.clone()).await;
        let client = init_client(ClientConfig::default(), ext);
        let proxy = ServiceProxy::new(client, hello_key());
        let mut handles = Vec::new();
        for _ in 0..10 {
            let proxy = proxy.clone();
            handles.push(tokio::spawn(async move { proxy.call("sleep", vec![json!(300)]).await }));
        }
        let (mut ok, mut overloaded) = (0, 0);
        for h in handles {
            match h.await.expect("join") {
                Ok(v) => {
                    assert_eq!(v, json!(300));
                    ok += 1;
                }
                Err(e) => {
                    assert_eq!(e.kind(), RpcIntErr::Overloaded);
                    overloaded += 1;
                }
            }
        }
        info!("ok {} overloaded {}", ok, overloaded);
        assert!(ok >= 1);
        assert!(overloaded >= 1);
        // Back to normal once the queue drains
        assert_eq!(proxy.call("sleep", vec![json!(1)]).await.expect("call"), json!(1));
    });
}

#[logfn]
#[rstest]
fn test_connection_lost(runner: TestRunner) {
    runner.block_on(async move {
        let local = Arc::new(LocalRegistry::default());
        let ext = kestrel_rpc_stream::default_extensions_with(local.clone());
        // Accepts, reads a little, then drops the socket without answering
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        });
        local.add(&hello_key().to_string(), addr);

        let client = init_client(ClientConfig::default(), ext);
        let proxy = ServiceProxy::new(client.clone(), hello_key()).with_timeout(Duration::from_secs(5));
        let e = proxy.call("hello", vec![json!("a")]).await.unwrap_err();
        assert_eq!(e.kind(), RpcIntErr::Closed);
        assert_eq!(client.conn_count(), 0);
    });
}

#[logfn]
#[rstest]
fn test_bad_magic_closes_conn(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let (_server, hello, addr) = init_server(ServerConfig::default(), ext.clone()).await;
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.expect("write");
        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("closed in time")
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert_eq!(hello.invoked(), 0);

        // Other connections are not affected
        let client = init_client(ClientConfig::default(), ext);
        let proxy = ServiceProxy::new(client, hello_key());
        assert_eq!(proxy.call("hello", vec![json!("a")]).await.expect("call"), json!("Hello a"));
    });
}

#[logfn]
#[rstest]
fn test_server_close(runner: TestRunner) {
    runner.block_on(async move {
        let local = Arc::new(LocalRegistry::default());
        let ext = kestrel_rpc_stream::default_extensions_with(local.clone());
        let (mut server, _hello, addr) = init_server(ServerConfig::default(), ext.clone()).await;
        assert_eq!(local.get(&hello_key().to_string()), vec![addr]);
        let client = init_client(ClientConfig::default(), ext);
        let proxy = ServiceProxy::new(client.clone(), hello_key());
        proxy.call("hello", vec![json!("a")]).await.expect("call");
        let conn = client.get_conn(addr).await.expect("conn");

        server.close().await;
        assert_eq!(server.get_alive_conn(), 0);
        assert!(local.get(&hello_key().to_string()).is_empty());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(conn.is_closed());

        let e = proxy.call("hello", vec![json!("b")]).await.unwrap_err();
        assert_eq!(e, RpcIntErr::NoInstance);
    });
}

#[logfn]
#[rstest]
fn test_closed_conn_pruned(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let (mut server1, _hello1, addr1) = init_server(ServerConfig::default(), ext.clone()).await;
        let (_server2, _hello2, addr2) = init_server(ServerConfig::default(), ext.clone()).await;
        let client = init_client(ClientConfig::default(), ext);
        let conn1 = client.get_conn(addr1).await.expect("conn1");
        let conn2 = client.get_conn(addr2).await.expect("conn2");
        assert_eq!(client.conn_count(), 2);

        server1.close().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(conn1.is_closed());
        assert_eq!(client.conn_count(), 1);
        assert!(Arc::ptr_eq(&conn2, &client.get_conn(addr2).await.expect("conn2")));
        assert!(client.get_conn(addr1).await.is_err());
        assert_eq!(client.conn_count(), 1);
    });
}
