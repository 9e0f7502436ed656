//! Server failure and recovery scenarios.

mod common;

use common::{CALC_PY, TestWorkspace};
use kadabra_sigils::error::{LspError, ToolError};
use kadabra_sigils::lsp::client::ServerState;
use kadabra_sigils::symbols::model::FindOptions;

#[tokio::test]
async fn test_dead_server_fails_queries_until_reactivation() {
    let ws = TestWorkspace::with_files(&[("a.py", CALC_PY)]).await;
    let path = ws.apath("a.py");

    // Healthy first.
    let hits = ws
        .project
        .retriever()
        .find_by_name(&"Calc".parse().unwrap(), &path, &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    // Take the server down underneath the project.
    let server = ws.project.manager().server_for(&path).await.unwrap();
    server.shutdown().await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);

    // Queries for that language now fail fast; nothing restarts implicitly.
    let err = ws
        .project
        .retriever()
        .find_by_name(&"Calc".parse().unwrap(), &path, &FindOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Lsp(LspError::ServerDown(_))));

    // Explicit reactivation brings a fresh fleet; the query succeeds again.
    let project = ws.agent.reactivate().await.unwrap();
    let hits = project
        .retriever()
        .find_by_name(&"Calc".parse().unwrap(), &path, &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_shutdown_all_stops_every_server() {
    let ws = TestWorkspace::with_files(&[("a.py", CALC_PY)]).await;
    let path = ws.apath("a.py");

    let server = ws.project.manager().server_for(&path).await.unwrap();
    assert_eq!(server.state(), ServerState::Ready);

    ws.project.manager().shutdown_all().await;
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_switching_projects_shuts_down_previous_fleet() {
    let ws_a = TestWorkspace::with_files(&[("a.py", CALC_PY)]).await;
    let server_a = ws_a
        .project
        .manager()
        .server_for(&ws_a.apath("a.py"))
        .await
        .unwrap();

    // Activate a different root on the same agent.
    let dir_b = tempfile::TempDir::new().unwrap();
    std::fs::write(dir_b.path().join("b.py"), "def g(): pass\n").unwrap();
    let project_b = ws_a.agent.activate_project(dir_b.path()).await.unwrap();

    assert_eq!(server_a.state(), ServerState::Stopped);
    let hits = project_b
        .retriever()
        .find_by_name(
            &"g".parse().unwrap(),
            project_b.root(),
            &FindOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_open_files_are_dropped_on_shutdown() {
    let ws = TestWorkspace::with_files(&[("a.py", CALC_PY)]).await;
    let path = ws.apath("a.py");

    ws.project.retriever().overview(&path).await.unwrap();
    let server = ws.project.manager().server_for(&path).await.unwrap();
    assert_eq!(server.open_version(&path).await, Some(1));

    server.shutdown().await.unwrap();
    assert_eq!(server.open_version(&path).await, None);
}
