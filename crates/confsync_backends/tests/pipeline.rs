//! End-to-end runs of resources against real backend clients.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use confsync_backends::{new_client, BackendConfig, BackendKind, JsonClient, MemoryClient};
use confsync_core::{
    BackoffPolicy, CycleOutcome, ResourceConfig, ResourceDriver, ResourceLoader, StoreClient,
    SyncMode, SyncOptions, TemplateResource,
};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

async fn wait_for_content(path: &Path, expected: &str) {
    for _ in 0..300 {
        if fs::read_to_string(path).ok().as_deref() == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{:?} never contained {:?}", path, expected);
}

#[tokio::test]
async fn test_json_later_file_wins() {
    let temp = tempdir().unwrap();
    let first = temp.path().join("base.json");
    let second = temp.path().join("override.json");
    fs::write(
        &first,
        r#"{ "prefix": "/app", "kv": [{ "key": "port", "value": "80" }, { "key": "host", "value": "a" }] }"#,
    )
    .unwrap();
    fs::write(&second, r#"{ "kv": [{ "fullkey": "/app/port", "value": "8080" }] }"#).unwrap();

    let client = new_client(
        &BackendConfig::new(BackendKind::Json)
            .node(&first)
            .node(&second),
    )
    .unwrap();
    let values = client.get_values(&["/app".to_string()]).await.unwrap();
    assert_eq!(values["/app/port"], "8080");
    assert_eq!(values["/app/host"], "a");
}

#[tokio::test]
async fn test_conf_dir_against_json_backend() {
    let temp = tempdir().unwrap();
    let confdir = temp.path().join("etc");
    let dest = temp.path().join("nginx.conf");
    fs::create_dir_all(confdir.join("conf.d")).unwrap();
    fs::create_dir_all(confdir.join("templates")).unwrap();

    let data = temp.path().join("kv.json");
    fs::write(
        &data,
        r#"{ "prefix": "/prod/nginx", "kv": [
            { "key": "upstreams/a", "value": "10.0.0.1" },
            { "key": "upstreams/b", "value": "10.0.0.2" },
            { "key": "port", "value": "80" }
        ] }"#,
    )
    .unwrap();
    fs::write(
        confdir.join("templates/nginx.tmpl"),
        "listen {{ getv('/port') }};\n{% for u in gets('/upstreams/*') %}server {{ u.value }};\n{% endfor %}",
    )
    .unwrap();
    fs::write(
        confdir.join("conf.d/nginx.toml"),
        format!(
            "[template]\nsrc = \"nginx.tmpl\"\ndest = {:?}\nkeys = [\"/port\", \"/upstreams\"]\nprefix = \"/nginx\"\nmode = \"0600\"\n",
            dest.display().to_string()
        ),
    )
    .unwrap();

    let client: Arc<dyn StoreClient> = Arc::new(JsonClient::new(vec![data]).unwrap());
    let options = SyncOptions::default().with_prefix("/prod");
    let mut resources = ResourceLoader::new(&confdir)
        .load_all(client, &options)
        .unwrap();
    let resource = &mut resources[0];

    let stop = CancellationToken::new();
    assert_eq!(resource.process(&stop).await.unwrap(), CycleOutcome::Updated);
    assert_eq!(
        fs::read_to_string(&dest).unwrap(),
        "listen 80;\nserver 10.0.0.1;\nserver 10.0.0.2;\n"
    );
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(fs::metadata(&dest).unwrap().permissions().mode() & 0o7777, 0o600);
    }
    assert_eq!(resource.process(&stop).await.unwrap(), CycleOutcome::Unchanged);
}

#[tokio::test]
async fn test_memory_watch_drives_check_and_reload() {
    let temp = tempdir().unwrap();
    let dest = temp.path().join("app.conf");
    let reloads = temp.path().join("reloads");
    let client = MemoryClient::new().with_values([("/app/port", "8080")]);

    let config = ResourceConfig::new("app.tmpl", &dest)
        .key("/app")
        .check_cmd("grep -q port= {{ src }}")
        .reload_cmd(format!("echo reload >> {}", reloads.display()));
    let resource = TemplateResource::new(
        "app",
        config,
        "port={{ getv('/app/port') }}\n",
        Arc::new(client.clone()),
        &SyncOptions::default(),
    )
    .unwrap();

    let driver = ResourceDriver::new(vec![resource], Arc::new(client.clone()), SyncMode::Watch)
        .unwrap();
    let stop = CancellationToken::new();
    let handle = tokio::spawn(driver.run(stop.clone()));

    wait_for_content(&dest, "port=8080\n").await;
    client.set("/app/port", "9090");
    wait_for_content(&dest, "port=9090\n").await;
    // Unrelated keys never trigger a rewrite.
    client.set("/other/key", "x");
    tokio::time::sleep(Duration::from_millis(50)).await;

    stop.cancel();
    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.resources[0].updated, 2);
    assert_eq!(fs::read_to_string(&reloads).unwrap(), "reload\nreload\n");
}

#[tokio::test]
async fn test_watch_recovers_after_backend_outage() {
    let temp = tempdir().unwrap();
    let dest = temp.path().join("app.conf");
    let client = MemoryClient::new().with_values([("/app/port", "1")]);
    client.fail_next_gets(2);

    let resource = TemplateResource::new(
        "app",
        ResourceConfig::new("app.tmpl", &dest).key("/app"),
        "{{ getv('/app/port') }}",
        Arc::new(client.clone()),
        &SyncOptions::default(),
    )
    .unwrap();
    let driver = ResourceDriver::new(vec![resource], Arc::new(client.clone()), SyncMode::Watch)
        .unwrap()
        .with_backoff(BackoffPolicy::new(
            Duration::from_millis(5),
            Duration::from_millis(20),
        ));
    let stop = CancellationToken::new();
    let handle = tokio::spawn(driver.run(stop.clone()));

    wait_for_content(&dest, "1").await;
    stop.cancel();
    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    let app = &report.resources[0];
    assert_eq!(app.failures, 2);
    assert_eq!(app.updated, 1);
    assert!(client.get_calls() >= 3);
}

#[tokio::test]
async fn test_failing_watch_backs_off_and_recovers() {
    let temp = tempdir().unwrap();
    let dest = temp.path().join("app.conf");
    let client = MemoryClient::new().with_values([("/app/port", "1")]);

    let resource = TemplateResource::new(
        "app",
        ResourceConfig::new("app.tmpl", &dest).key("/app"),
        "{{ getv('/app/port') }}",
        Arc::new(client.clone()),
        &SyncOptions::default(),
    )
    .unwrap();
    let driver = ResourceDriver::new(vec![resource], Arc::new(client.clone()), SyncMode::Watch)
        .unwrap()
        .with_backoff(
            BackoffPolicy::new(Duration::from_millis(40), Duration::from_secs(1)).multiplier(1.0),
        );
    let stop = CancellationToken::new();
    let handle = tokio::spawn(driver.run(stop.clone()));
    wait_for_content(&dest, "1").await;

    client.simulate_failure(Some("watch stream reset".to_string()));
    let before = client.watch_calls();
    client.set("/app/port", "2");
    tokio::time::sleep(Duration::from_millis(300)).await;
    let retries = client.watch_calls() - before;
    assert!(retries >= 3, "watch retried only {} times", retries);
    assert!(retries <= 20, "watch retried {} times without waiting", retries);
    assert_eq!(fs::read_to_string(&dest).unwrap(), "1");

    client.simulate_failure(None);
    wait_for_content(&dest, "2").await;

    stop.cancel();
    let report = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.resources[0].updated, 2);
}

#[tokio::test]
async fn test_noop_never_writes() {
    let temp = tempdir().unwrap();
    let dest = temp.path().join("app.conf");
    let client = MemoryClient::new().with_values([("/app/port", "1")]);

    let resource = TemplateResource::new(
        "app",
        ResourceConfig::new("app.tmpl", &dest)
            .key("/app")
            .reload_cmd("exit 1"),
        "{{ getv('/app/port') }}",
        Arc::new(client.clone()),
        &SyncOptions::default().noop(true),
    )
    .unwrap();
    let report = ResourceDriver::new(vec![resource], Arc::new(client), SyncMode::Once)
        .unwrap()
        .run(CancellationToken::new())
        .await;

    assert!(report.is_success());
    assert_eq!(report.resources[0].updated, 0);
    assert!(!dest.exists());
}
