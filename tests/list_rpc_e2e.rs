use std::{collections::BTreeMap, net::SocketAddr, path::Path, sync::Arc};

use anyhow::Context as _;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

use remotelist::{
    checkpoint::{CheckpointOutcome, Checkpointer},
    recovery::recover,
    rpc::{client, server::RemoteListService},
    store::{ListStore, StorePaths},
};

struct ServerHandle {
    addr: SocketAddr,
    store: Arc<ListStore>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<anyhow::Result<()>>,
}

impl ServerHandle {
    async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.join
            .await
            .context("join rpc server task")?
            .context("rpc server exited with error")?;
        Ok(())
    }
}

fn store_paths(dir: &Path) -> StorePaths {
    StorePaths::new(dir.join("remotelist.log"), dir.join("remotelist.snapshot.json"))
}

async fn spawn_server(dir: &Path) -> anyhow::Result<ServerHandle> {
    let (store, _) = ListStore::open(store_paths(dir)).context("open store")?;
    let store = Arc::new(store);

    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .context("bind rpc listener")?;
    let addr = listener.local_addr().context("rpc local_addr")?;
    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let service = RemoteListService::new(store.clone()).into_server();
    let join = tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(service)
            .serve_with_incoming_shutdown(incoming, async {
                let _ = shutdown_rx.await;
            })
            .await
            .map_err(|e| anyhow::anyhow!("tonic serve: {e}"))?;
        Ok(())
    });

    Ok(ServerHandle {
        addr,
        store,
        shutdown_tx: Some(shutdown_tx),
        join,
    })
}

#[tokio::test]
async fn append_remove_size_get_over_rpc() {
    let tmp = tempfile::tempdir().unwrap();
    let server = spawn_server(tmp.path()).await.unwrap();
    let mut client = client::connect(server.addr).await.unwrap();

    for value in [10, 20, 30] {
        assert!(client.append(1, value).await.unwrap());
    }
    assert_eq!(client.size(1).await.unwrap(), 3);
    assert_eq!(client.get(1, 0).await.unwrap(), 10);
    assert_eq!(client.get(1, 2).await.unwrap(), 30);
    assert_eq!(client.remove(1).await.unwrap(), 30);
    assert_eq!(client.size(1).await.unwrap(), 2);

    let empty = client.remove(99).await.unwrap_err();
    assert_eq!(empty.code(), tonic::Code::FailedPrecondition);

    let out_of_range = client.get(1, 2).await.unwrap_err();
    assert_eq!(out_of_range.code(), tonic::Code::OutOfRange);
    assert_eq!(client.get(1, 1).await.unwrap(), 20);

    assert_eq!(client.size(42).await.unwrap(), 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrent_clients_lose_no_appends() {
    let tmp = tempfile::tempdir().unwrap();
    let server = spawn_server(tmp.path()).await.unwrap();
    let checkpointer = Arc::new(Checkpointer::new(server.store.clone(), 20));

    let mut tasks = Vec::new();
    for worker in 0..4i64 {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            let mut client = client::connect(addr).await.unwrap();
            for i in 0..25 {
                client.append(1, worker * 1000 + i).await.unwrap();
            }
        }));
    }
    // Checkpoints race with the writers.
    let checkpoints = {
        let checkpointer = checkpointer.clone();
        tokio::spawn(async move {
            for _ in 0..5 {
                checkpointer.run_once().await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    for task in tasks {
        task.await.unwrap();
    }
    checkpoints.await.unwrap();

    let mut client = client::connect(server.addr).await.unwrap();
    assert_eq!(client.size(1).await.unwrap(), 100);

    let live = server.store.lists().await;
    let paths = server.store.paths().clone();
    server.shutdown().await.unwrap();

    let recovered = recover(&paths).unwrap();
    assert_eq!(recovered.lists, live);
    assert_eq!(recovered.lists.get(&1).map(Vec::len), Some(100));
}

#[tokio::test]
async fn restart_recovers_snapshot_plus_log() {
    let tmp = tempfile::tempdir().unwrap();

    let server = spawn_server(tmp.path()).await.unwrap();
    let mut client = client::connect(server.addr).await.unwrap();
    client.append(1, 1).await.unwrap();
    client.append(1, 2).await.unwrap();
    let outcome = Checkpointer::new(server.store.clone(), 20)
        .run_once()
        .await
        .unwrap();
    assert!(matches!(outcome, CheckpointOutcome::Completed(_)));
    client.append(2, 3).await.unwrap();
    client.remove(1).await.unwrap();
    server.shutdown().await.unwrap();

    let server = spawn_server(tmp.path()).await.unwrap();
    assert_eq!(
        server.store.lists().await,
        BTreeMap::from([(1, vec![1]), (2, vec![3])])
    );
    let mut client = client::connect(server.addr).await.unwrap();
    assert_eq!(client.get(2, 0).await.unwrap(), 3);
    server.shutdown().await.unwrap();
}
