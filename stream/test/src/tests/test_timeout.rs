use crate::*;
use kestrel_rpc_core::error::RpcIntErr;
use kestrel_rpc_stream::client::{ClientConfig, ServiceProxy};
use kestrel_rpc_stream::server::ServerConfig;
use log::*;
use serde_json::json;
use std::time::{Duration, Instant};

#[logfn]
#[rstest]
fn test_call_timeout(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let (_server, hello, addr) = init_server(ServerConfig::default(), ext.clone()).await;
        let client = init_client(ClientConfig::default(), ext);
        let slow = ServiceProxy::new(client.clone(), hello_key()).with_timeout(Duration::from_millis(200));
        // Outlives the late response on the same connection
        let long = {
            let proxy = ServiceProxy::new(client.clone(), hello_key());
            tokio::spawn(async move { proxy.call("sleep", vec![json!(1500)]).await })
        };

        let start = Instant::now();
        let e = slow.call("sleep", vec![json!(800)]).await.unwrap_err();
        assert_eq!(e.kind(), RpcIntErr::Timeout);
        assert!(start.elapsed() < Duration::from_millis(700));
        let conn = client.get_conn(addr).await.expect("conn");
        assert_eq!(conn.pending_count(), 1);

        // Other calls are not affected while the late response is on its way
        let proxy = ServiceProxy::new(client.clone(), hello_key());
        assert_eq!(proxy.call("hello", vec![json!("a")]).await.expect("call"), json!("Hello a"));

        // The late response is dropped, the server still finished its work
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(long.await.expect("join").expect("long call"), json!(1500));
        assert_eq!(hello.invoked(), 3);
        assert_eq!(conn.pending_count(), 0);
        assert!(!conn.is_closed());
        assert_eq!(proxy.call("hello", vec![json!("b")]).await.expect("call"), json!("Hello b"));
        info!("late response dropped");
    });
}

#[logfn]
#[rstest]
fn test_default_task_timeout(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let (_server, _hello, _addr) = init_server(ServerConfig::default(), ext.clone()).await;
        let client_config = ClientConfig { task_timeout: Duration::from_millis(300), ..Default::default() };
        let client = init_client(client_config, ext);
        let proxy = ServiceProxy::new(client.clone(), hello_key());
        assert_eq!(proxy.call("sleep", vec![json!(10)]).await.expect("fast"), json!(10));
        let e = proxy.call("sleep", vec![json!(1000)]).await.unwrap_err();
        assert_eq!(e.kind(), RpcIntErr::Timeout);
        assert!(e.kind().is_retriable());
    });
}
