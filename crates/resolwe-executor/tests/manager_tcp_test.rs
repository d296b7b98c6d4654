// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bootstrap against a real manager listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use resolwe_executor::{
    Bootstrap, ExecutorConfig, ExecutorError, ManagerChannel, ManagerConnection,
    TcpManagerConnection,
};
use resolwe_protocol::{
    ClientError, Command, ExecutorCommand, ManagerClientConfig, ManagerReply, ManagerServer,
};
use tempfile::TempDir;
use tokio::sync::Mutex;

type Received = Arc<Mutex<Vec<ExecutorCommand>>>;

async fn start_manager(reply: ManagerReply) -> (SocketAddr, Received) {
    let server = ManagerServer::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let received: Received = Arc::new(Mutex::new(Vec::new()));

    let sink = received.clone();
    tokio::spawn(server.run(move |command| {
        let sink = sink.clone();
        let reply = reply.clone();
        async move {
            sink.lock().await.push(command);
            reply
        }
    }));
    (addr, received)
}

fn client_config(addr: SocketAddr) -> ManagerClientConfig {
    ManagerClientConfig {
        manager_addr: addr,
        connect_timeout_ms: 1_000,
        reply_timeout_ms: 1_000,
    }
}

#[tokio::test]
async fn test_null_executor_over_tcp() {
    let (addr, received) = start_manager(ManagerReply::ok()).await;
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("process_script.sh"), "echo hi").unwrap();
    let config = ExecutorConfig::new(5, dir.path())
        .with_work_dir(dir.path())
        .with_manager_addr(addr);

    let connection = Arc::new(TcpManagerConnection::new(config.manager.clone()));
    Bootstrap::new(config, connection.clone())
        .run(".null")
        .await
        .unwrap();
    assert!(!connection.client().is_connected().await);

    // The listener handles frames on its own task; give it a moment.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let received = received.lock().await;
    let finish = received
        .iter()
        .find(|c| matches!(c.command, Command::Finish { .. }))
        .expect("finish reached the manager");
    assert_eq!(finish.data_id, 5);
}

#[tokio::test]
async fn test_local_spawn_and_export_over_tcp() {
    let (addr, received) = start_manager(ManagerReply::ok()).await;
    let data_dir = TempDir::new().unwrap();
    let upload_dir = TempDir::new().unwrap();
    std::fs::write(
        data_dir.path().join("process_script.sh"),
        "echo done > out.txt\necho 'run {\"process\": \"p\"}'\necho 'export out.txt'\n",
    )
    .unwrap();
    let config = ExecutorConfig::new(5, data_dir.path())
        .with_work_dir(data_dir.path())
        .with_upload_dir(upload_dir.path())
        .with_manager_addr(addr);

    let connection = Arc::new(TcpManagerConnection::new(config.manager.clone()));
    Bootstrap::new(config, connection)
        .run(".local")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let received = received.lock().await;
    let Some(Command::Finish {
        process_rc,
        spawn_processes,
        exported_files_mapper,
    }) = received
        .iter()
        .map(|c| &c.command)
        .find(|c| matches!(c, Command::Finish { .. }))
    else {
        panic!("finish did not reach the manager");
    };
    assert_eq!(*process_rc, 0);
    assert_eq!(
        spawn_processes.as_deref(),
        Some(&[serde_json::json!({"process": "p"})][..])
    );
    let unique_name = &exported_files_mapper.as_ref().unwrap()[&5]["out.txt"];
    assert_eq!(
        std::fs::read_to_string(upload_dir.path().join(unique_name)).unwrap(),
        "done\n"
    );
}

#[tokio::test]
async fn test_rejected_command_is_not_an_error() {
    let (addr, _received) = start_manager(ManagerReply::error()).await;
    let connection = Arc::new(TcpManagerConnection::new(client_config(addr)));
    connection.init().await.unwrap();

    let channel = ManagerChannel::new(connection.clone(), 9);
    assert!(!channel.finish(0, None, None).await.unwrap());
    assert!(channel.abort().await.unwrap());

    connection.deinit().await.unwrap();
}

#[tokio::test]
async fn test_init_fails_without_manager() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connection = TcpManagerConnection::new(client_config(addr));
    let err = connection.init().await.unwrap_err();
    assert!(matches!(
        err,
        ExecutorError::Manager(ClientError::Connect(_) | ClientError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_send_before_init_fails() {
    let connection = Arc::new(TcpManagerConnection::new(ManagerClientConfig::default()));
    let channel = ManagerChannel::new(connection, 1);

    let err = channel.update_status(Default::default()).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Manager(ClientError::NotConnected)));
}
