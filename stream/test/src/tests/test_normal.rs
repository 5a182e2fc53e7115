use crate::service::{HelloReply, HelloRequest};
use crate::*;
use kestrel_rpc_core::error::RpcIntErr;
use kestrel_rpc_core::message::RpcRequest;
use kestrel_rpc_stream::client::{ClientConfig, ServiceProxy};
use kestrel_rpc_stream::server::ServerConfig;
use log::*;
use serde_json::json;

#[logfn]
#[rstest]
#[case("msgpack", "gzip")]
#[case("msgpack", "none")]
#[case("json", "gzip")]
#[case("json", "none")]
fn test_hello(runner: TestRunner, #[case] serializer: &'static str, #[case] compressor: &'static str) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let (mut server, hello, addr) = init_server(ServerConfig::default(), ext.clone()).await;
        let client_config = ClientConfig {
            serializer: serializer.to_string(),
            compressor: compressor.to_string(),
            ..Default::default()
        };
        let client = init_client(client_config, ext);
        let proxy = ServiceProxy::new(client.clone(), hello_key());
        let reply = proxy.call("hello", vec![json!("world")]).await.expect("call hello");
        assert_eq!(reply, json!("Hello world"));
        assert_eq!(hello.invoked(), 1);

        let conn = client.get_conn(addr).await.expect("conn");
        assert_eq!(conn.peer_addr(), addr);
        assert_eq!(conn.pending_count(), 0);
        assert_eq!(client.conn_count(), 1);
        info!("hello over {}/{} done", serializer, compressor);
        server.close().await;
    });
}

#[logfn]
#[rstest]
fn test_typed_call(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let (_server, _hello, _addr) = init_server(ServerConfig::default(), ext.clone()).await;
        let client = init_client(ClientConfig::default(), ext);
        let proxy = ServiceProxy::new(client.clone(), hello_key());
        let req = HelloRequest { message: "111".to_string(), description: "222".to_string() };
        let reply: HelloReply =
            proxy.call_as("greet", vec![serde_json::to_value(&req).unwrap()]).await.expect("greet");
        assert_eq!(reply, HelloReply { greeting: "111, 222".to_string(), length: 8 });

        // The same call without the proxy
        let value = client
            .send_request(RpcRequest::new(&hello_key(), "greet", vec![serde_json::to_value(&req).unwrap()]))
            .await
            .expect("send_request");
        assert_eq!(value["greeting"], json!("111, 222"));

        // A value of another shape does not decode
        let e = proxy.call_as::<HelloReply>("hello", vec![json!("x")]).await.unwrap_err();
        assert_eq!(e.kind(), RpcIntErr::Decode);
    });
}

#[logfn]
#[rstest]
fn test_out_of_order_completion(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let server_config = ServerConfig { worker_count: 16, ..Default::default() };
        let (_server, hello, _addr) = init_server(server_config, ext.clone()).await;
        let client = init_client(ClientConfig::default(), ext);
        let proxy = ServiceProxy::new(client.clone(), hello_key());
        // Earlier calls sleep longer, so responses come back in reverse order
        let mut handles = Vec::new();
        for i in 0..16u64 {
            let proxy = proxy.clone();
            let ms = (16 - i) * 20;
            handles.push(tokio::spawn(async move {
                let r = proxy.call("sleep", vec![json!(ms)]).await;
                (ms, r)
            }));
        }
        for h in handles {
            let (ms, r) = h.await.expect("join");
            assert_eq!(r.expect("sleep"), json!(ms));
        }
        assert_eq!(hello.invoked(), 16);
        assert_eq!(client.conn_count(), 1);
    });
}

#[logfn]
#[rstest]
fn test_round_robin_across_servers(runner: TestRunner) {
    runner.block_on(async move {
        let ext = kestrel_rpc_stream::default_extensions();
        let (_server1, hello1, _) = init_server(ServerConfig::default(), ext.clone()).await;
        let (_server2, hello2, _) = init_server(ServerConfig::default(), ext.clone()).await;
        let client_config = ClientConfig { balancer: "round_robin".to_string(), ..Default::default() };
        let client = init_client(client_config, ext);
        let proxy = ServiceProxy::new(client.clone(), hello_key());
        for _ in 0..10 {
            proxy.call("hello", vec![json!("rr")]).await.expect("call");
        }
        assert_eq!(hello1.invoked(), 5);
        assert_eq!(hello2.invoked(), 5);
        assert_eq!(client.conn_count(), 2);
        client.close();
        assert_eq!(client.conn_count(), 0);
    });
}
