//! Edit engine scenarios: splices, conflicts, renames, concurrency.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{CALC_PY, TestWorkspace};
use kadabra_sigils::error::ToolError;
use kadabra_sigils::symbols::model::FindOptions;
use kadabra_sigils::symbols::retriever::ResolvedSymbol;

async fn resolve(ws: &TestWorkspace, name_path: &str, rel: &str) -> ResolvedSymbol {
    ws.project
        .retriever()
        .resolve_unique(&name_path.parse().unwrap(), &ws.apath(rel))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_replace_body() {
    let ws = TestWorkspace::with_files(&[("a.py", CALC_PY)]).await;
    let add = resolve(&ws, "Calc/add", "a.py").await;

    ws.project
        .edits()
        .replace_body(&add, "def add(self,a,b): return a+b+0")
        .await
        .unwrap();

    let content = ws.read("a.py");
    assert!(content.contains("return a+b+0"));
    assert!(content.contains("def sub"));

    // The file was open from resolution; the write bumped its version.
    let server = ws
        .project
        .manager()
        .server_for(&ws.apath("a.py"))
        .await
        .unwrap();
    assert_eq!(server.open_version(&ws.apath("a.py")).await, Some(2));

    // Cache was invalidated and the next query sees the new body.
    let again = resolve(&ws, "Calc/add", "a.py").await;
    assert_eq!(again.node().body.as_deref(), Some("def add(self,a,b): return a+b+0"));
}

#[tokio::test]
async fn test_replace_body_with_itself_is_idempotent() {
    let ws = TestWorkspace::with_files(&[("a.py", CALC_PY)]).await;
    let add = resolve(&ws, "Calc/add", "a.py").await;
    let body = add.node().body.clone().unwrap();
    let before = ws.read("a.py");

    let server = ws
        .project
        .manager()
        .server_for(&ws.apath("a.py"))
        .await
        .unwrap();
    let version_before = server.open_version(&ws.apath("a.py")).await.unwrap();

    ws.project.edits().replace_body(&add, &body).await.unwrap();

    // Bytes identical, but the server still got a didChange for the write.
    assert_eq!(ws.read("a.py"), before);
    assert_eq!(
        server.open_version(&ws.apath("a.py")).await.unwrap(),
        version_before + 1
    );
}

#[tokio::test]
async fn test_stale_symbol_is_a_conflict() {
    let ws = TestWorkspace::with_files(&[("a.py", CALC_PY)]).await;
    let add = resolve(&ws, "Calc/add", "a.py").await;

    // Another editor rewrites the file after resolution.
    let mutated = CALC_PY.replace("a+b", "b+a");
    ws.write_externally("a.py", &mutated);

    let err = ws
        .project
        .edits()
        .replace_body(&add, "def add(self,a,b): return 0")
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::EditConflict { .. }));

    // The conflicting write did not touch the file.
    assert_eq!(ws.read("a.py"), mutated);
}

#[tokio::test]
async fn test_insert_before_and_after() {
    let ws = TestWorkspace::with_files(&[("a.py", "def solo():\n    return 1\n")]).await;

    let solo = resolve(&ws, "solo", "a.py").await;
    ws.project
        .edits()
        .insert_before(&solo, "import os\n\n")
        .await
        .unwrap();
    assert!(ws.read("a.py").starts_with("import os\n\ndef solo():"));

    let solo = resolve(&ws, "solo", "a.py").await;
    ws.project
        .edits()
        .insert_after(&solo, "\n\ndef sibling():\n    return 2")
        .await
        .unwrap();

    let content = ws.read("a.py");
    assert!(content.contains("def sibling():"));
    // The new sibling is discoverable.
    let sibling = resolve(&ws, "sibling", "a.py").await;
    assert_eq!(sibling.node().name, "sibling");
}

#[tokio::test]
async fn test_rename_across_files() {
    let ws = TestWorkspace::with_files(&[
        ("a.py", "def getUserData():\n    return 1\n"),
        ("b.py", "def use():\n    return getUserData()\n"),
    ])
    .await;

    // Open both files so the server's view must be resynced for both.
    ws.project.retriever().overview(&ws.apath("b.py")).await.unwrap();
    let symbol = resolve(&ws, "getUserData", "a.py").await;

    let applied = ws
        .project
        .edits()
        .rename(&symbol, "get_user_data")
        .await
        .unwrap();

    assert_eq!(applied.files.len(), 2);
    assert_eq!(applied.edit_count, 2);
    assert!(applied.files[0].ends_with("a.py"));
    assert!(applied.files[1].ends_with("b.py"));

    assert_eq!(ws.read("a.py"), "def get_user_data():\n    return 1\n");
    assert_eq!(ws.read("b.py"), "def use():\n    return get_user_data()\n");

    // Both files were open; both got a didChange for the rewrite.
    let server = ws
        .project
        .manager()
        .server_for(&ws.apath("a.py"))
        .await
        .unwrap();
    assert_eq!(server.open_version(&ws.apath("a.py")).await, Some(2));
    assert_eq!(server.open_version(&ws.apath("b.py")).await, Some(2));

    // Old cache entries are gone: the renamed symbol resolves fresh.
    let renamed = resolve(&ws, "get_user_data", "a.py").await;
    assert_eq!(renamed.node().name, "get_user_data");
}

#[tokio::test]
async fn test_rename_conflict_on_stale_resolution() {
    let ws = TestWorkspace::with_files(&[("a.py", "def f():\n    return 1\n")]).await;
    let symbol = resolve(&ws, "f", "a.py").await;

    ws.write_externally("a.py", "def f():\n    return 2\n");

    let err = ws
        .project
        .edits()
        .rename(&symbol, "g")
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::EditConflict { .. }));
    assert_eq!(ws.read("a.py"), "def f():\n    return 2\n");
}

#[tokio::test]
async fn test_concurrent_overview_during_replace_sees_whole_trees() {
    let ws = Arc::new(TestWorkspace::with_files(&[("a.py", CALC_PY)]).await);
    let add = resolve(&ws, "Calc/add", "a.py").await;

    let pre: BTreeSet<String> = ["/Calc", "/Calc/add", "/Calc/sub"]
        .into_iter()
        .map(String::from)
        .collect();
    let post: BTreeSet<String> = ["/Calc", "/Calc/added", "/Calc/sub"]
        .into_iter()
        .map(String::from)
        .collect();

    let reader = {
        let ws = Arc::clone(&ws);
        let post = post.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                let entries = ws
                    .project
                    .retriever()
                    .overview(&ws.apath("a.py"))
                    .await
                    .unwrap();
                let seen: BTreeSet<String> =
                    entries.into_iter().map(|e| e.name_path).collect();
                assert!(
                    seen == pre || seen == post,
                    "overview observed a torn tree: {seen:?}"
                );
            }
        })
    };

    ws.project
        .edits()
        .replace_body(&add, "def added(self,a,b): return a+b")
        .await
        .unwrap();

    reader.await.unwrap();

    let entries = ws
        .project
        .retriever()
        .overview(&ws.apath("a.py"))
        .await
        .unwrap();
    let seen: BTreeSet<String> = entries.into_iter().map(|e| e.name_path).collect();
    assert_eq!(seen, post);
}

#[tokio::test]
async fn test_edits_to_different_files_proceed_in_parallel() {
    let ws = Arc::new(
        TestWorkspace::with_files(&[
            ("a.py", "def fa():\n    return 1\n"),
            ("b.py", "def fb():\n    return 2\n"),
        ])
        .await,
    );

    let sa = resolve(&ws, "fa", "a.py").await;
    let sb = resolve(&ws, "fb", "b.py").await;

    let (ra, rb) = tokio::join!(
        ws.project.edits().replace_body(&sa, "def fa():\n    return 10"),
        ws.project.edits().replace_body(&sb, "def fb():\n    return 20"),
    );
    ra.unwrap();
    rb.unwrap();

    assert!(ws.read("a.py").contains("return 10"));
    assert!(ws.read("b.py").contains("return 20"));
}
