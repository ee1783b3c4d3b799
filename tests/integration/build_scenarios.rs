//! End-to-end builds against the in-memory provider.

use crate::integration::test_utils::{harness, iso_config};
use gridbake::build::Builder;
use gridbake::cancel::{cancel_pair, CancelSignal};
use gridbake::error::BuildError;
use gridbake::remote::bootcmd::{self, BootVars};
use gridbake::remote::KeyAction;
use gridbake::runner::Runner;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn successful_build_produces_template_and_tears_down_the_rest() {
    let h = harness(iso_config());
    let outcome = Builder::new(h.services.clone(), None)
        .run(&CancelSignal::never())
        .await
        .unwrap();

    let artifact = outcome.result.unwrap().expect("artifact");
    assert_eq!(artifact.uuid, "tpl1");
    assert_eq!(artifact.name, "ubuntu-template");
    assert!(outcome.summary.cleanup_failures.is_empty());

    let p = &h.provider;
    assert!(p.called("create_snapshot stg1 ubuntu-template"));
    assert!(p.called("create_template snap1"));
    assert!(p.calls_to("delete_template").is_empty());

    // Snapshotting happens on a powered-off server.
    let shutdown = p.calls_to("shutdown_server");
    assert_eq!(shutdown.len(), 2);
    let last_shutdown = p
        .calls()
        .iter()
        .rposition(|c| c == "shutdown_server srv1")
        .unwrap();
    assert!(last_shutdown < p.position("create_snapshot stg1 ubuntu-template").unwrap());

    // Everything but the template is gone afterwards.
    for call in [
        "delete_snapshot stg1 snap1",
        "delete_iso_image iso1",
        "unlink_network srv1 net1",
        "unlink_ip srv1 ip1",
        "delete_ip ip1",
        "unlink_storage srv1 stg1",
        "delete_storage stg1",
        "stop_server srv1",
        "delete_server srv1",
    ] {
        assert!(p.called(call), "missing cleanup call {}", call);
    }
    assert!(p.position("delete_storage stg1").unwrap() < p.position("delete_server srv1").unwrap());
    assert!(h.reporter.contains("Created template (tpl1)"));
}

#[tokio::test]
async fn storage_quota_failure_unwinds_the_server_only() {
    let h = harness(iso_config());
    h.provider.fail("create_storage", 403, "quota exceeded");

    let outcome = Builder::new(h.services.clone(), None)
        .run(&CancelSignal::never())
        .await
        .unwrap();

    let err = outcome.result.unwrap_err();
    assert!(matches!(err, BuildError::Provider { .. }));
    assert!(err.to_string().contains("quota exceeded"));

    let p = &h.provider;
    assert!(p.calls_to("delete_storage").is_empty());
    assert!(p.calls_to("unlink_storage").is_empty());
    assert!(p.calls_to("create_ip").is_empty());
    assert!(p.called("stop_server srv1"));
    assert!(p.called("delete_server srv1"));
    assert!(p.position("stop_server srv1").unwrap() < p.position("delete_server srv1").unwrap());

    assert_eq!(outcome.summary.halted_at, Some(4));
    assert_eq!(outcome.summary.steps_run.last(), Some(&"CreateBootStorage"));
    assert_eq!(outcome.summary.steps_cleaned.len(), 21);
    assert_eq!(h.reporter.errors().len(), 1);
}

#[tokio::test]
async fn missing_iso_relation_still_restarts_the_server() {
    let h = harness(iso_config());
    h.provider.fail("unlink_iso_image", 404, "relation not found");

    let outcome = Builder::new(h.services.clone(), None)
        .run(&CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(outcome.result.unwrap().unwrap().uuid, "tpl1");
    let p = &h.provider;
    let unlink = p.position("unlink_iso_image srv1 iso1").unwrap();
    let starts: Vec<usize> = p
        .calls()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.as_str() == "start_server srv1")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(starts.len(), 2);
    assert!(starts[1] > unlink);
    assert!(outcome.summary.cleanup_failures.is_empty());
}

#[tokio::test]
async fn secondary_storage_is_skipped_unless_requested() {
    let h = harness(iso_config());
    let outcome = Builder::new(h.services.clone(), None)
        .run(&CancelSignal::never())
        .await
        .unwrap();
    assert!(outcome.result.is_ok());
    assert!(!h.provider.called("create_storage packer-build-secondary"));
    assert!(h.provider.calls_to("link_storage").len() == 1);
    assert!(h.reporter.contains("Skipping secondary storage: no secondary storage is requested"));
}

#[tokio::test]
async fn secondary_storage_is_the_snapshot_source() {
    let mut config = iso_config();
    config.secondary_storage = true;
    let h = harness(config);
    let outcome = Builder::new(h.services.clone(), None)
        .run(&CancelSignal::never())
        .await
        .unwrap();
    assert!(outcome.result.is_ok());

    let p = &h.provider;
    assert!(p.called("create_storage packer-build-secondary"));
    assert!(p.called("link_storage srv1 stg2 data"));
    assert!(p.called("create_snapshot stg2 ubuntu-template"));
    assert!(p.called("delete_snapshot stg2 snap1"));
    assert!(p.called("unlink_storage srv1 stg2"));
    assert!(p.called("delete_storage stg2"));
}

#[tokio::test]
async fn failed_link_is_never_unlinked() {
    let h = harness(iso_config());
    h.provider.fail("link_ip", 422, "ip in use");

    let outcome = Builder::new(h.services.clone(), None)
        .run(&CancelSignal::never())
        .await
        .unwrap();

    assert!(outcome.result.is_err());
    let p = &h.provider;
    assert!(p.calls_to("unlink_ip").is_empty());
    assert!(p.called("delete_ip ip1"));
    assert!(p.called("unlink_storage srv1 stg1"));
    assert!(p.calls_to("link_network").is_empty());
}

#[tokio::test]
async fn configured_iso_image_is_not_deleted() {
    let mut config = iso_config();
    config.isoimage_url.clear();
    config.isoimage_uuid = "shared-iso".to_string();
    let h = harness(config);

    let outcome = Builder::new(h.services.clone(), None)
        .run(&CancelSignal::never())
        .await
        .unwrap();
    assert!(outcome.result.is_ok());
    assert!(h.provider.calls_to("create_iso_image").is_empty());
    assert!(h.provider.called("link_iso_image srv1 shared-iso"));
    assert!(h.provider.calls_to("delete_iso_image").is_empty());
}

#[tokio::test]
async fn base_template_build_registers_a_temporary_ssh_key() {
    let mut config = iso_config();
    config.isoimage_url.clear();
    config.base_template_uuid = "base-tpl".to_string();
    config.ssh_password = "secret".to_string();
    let h = harness(config);

    let outcome = Builder::new(h.services.clone(), None)
        .run(&CancelSignal::never())
        .await
        .unwrap();
    assert!(outcome.result.is_ok());
    let p = &h.provider;
    assert!(p.called("create_ssh_key"));
    assert!(p.called("delete_ssh_key key1"));
    assert!(p.calls_to("create_iso_image").is_empty());
    assert!(p.calls_to("unlink_iso_image").is_empty());
}

#[tokio::test(start_paused = true)]
async fn hung_shutdown_falls_back_to_stop() {
    let h = harness(iso_config());
    h.provider.hang_on_shutdown();

    let outcome = Builder::new(h.services.clone(), None)
        .run(&CancelSignal::never())
        .await
        .unwrap();

    assert!(outcome.result.is_ok());
    assert!(h.reporter.contains("Trying to turn it off instead"));
    let p = &h.provider;
    let snapshot = p.position("create_snapshot stg1 ubuntu-template").unwrap();
    let stop_before_snapshot = p
        .calls()
        .iter()
        .take(snapshot)
        .filter(|c| c.as_str() == "stop_server srv1")
        .count();
    assert_eq!(stop_before_snapshot, 2);
}

#[tokio::test]
async fn cancelled_build_creates_nothing() {
    let h = harness(iso_config());
    let (handle, signal) = cancel_pair();
    handle.cancel();

    let outcome = Builder::new(h.services.clone(), None)
        .run(&signal)
        .await
        .unwrap();

    assert!(matches!(outcome.result, Err(BuildError::Cancelled)));
    assert!(h.provider.calls().is_empty());
    assert_eq!(outcome.summary.halted_at, Some(0));
    assert_eq!(outcome.summary.steps_cleaned.len(), 21);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_boot_wait_unwinds_everything() {
    let mut config = iso_config();
    config.boot_command = vec!["<enter>".to_string()];
    let h = harness(config);
    let (handle, signal) = cancel_pair();
    let builder = Builder::new(h.services.clone(), None);

    let (outcome, ()) = tokio::join!(builder.run(&signal), async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        handle.cancel();
    });
    let outcome = outcome.unwrap();

    assert!(matches!(outcome.result, Err(BuildError::Cancelled)));
    assert_eq!(outcome.summary.steps_run.last(), Some(&"ExecuteBootCommand"));
    assert_eq!(outcome.summary.steps_cleaned.len(), 21);

    let p = &h.provider;
    assert!(p.calls_to("create_snapshot").is_empty());
    assert!(p.called("delete_iso_image iso1"));
    assert!(p.called("delete_storage stg1"));
    assert!(p.called("delete_server srv1"));

    let log = h.remote.log();
    assert!(log.iter().all(|l| !l.starts_with("send ")));
    assert_eq!(log.iter().filter(|l| l.as_str() == "close").count(), 1);
}

#[tokio::test(start_paused = true)]
async fn file_server_feeds_the_boot_command() {
    let dir = TempDir::new().unwrap();
    let kickstart = dir.path().join("ks.cfg");
    fs::write(&kickstart, "text\nreboot\n").unwrap();

    let mut config = iso_config();
    config.files = vec![kickstart];
    config.boot_command = vec![
        "<esc><wait>".to_string(),
        "linux ks=http://{{ .HTTPIP }}:{{ .HTTPPort }}/ks.cfg<enter>".to_string(),
    ];
    let lines = config.boot_command.clone();
    let h = harness(config);

    let outcome = Builder::new(h.services.clone(), None)
        .run(&CancelSignal::never())
        .await
        .unwrap();
    assert!(outcome.result.is_ok(), "{:?}", outcome.result);

    // The helper server is created first, so it owns the first ids.
    let p = &h.provider;
    assert!(p.called("create_server file-server"));
    assert!(p.called("template_by_name Ubuntu 20.04 LTS (Focal Fossa)"));
    assert!(p.called("link_storage srv1 stg1 boot"));
    assert!(p.called("create_template snap1"));
    assert!(p.called("delete_server srv1"));
    assert!(p.called("delete_storage stg1"));
    assert!(p.called("delete_ip ip1"));
    assert!(p.called("delete_server srv2"));

    let log = h.remote.log();
    assert!(log.contains(&"upload 10.0.0.1 ks.cfg true".to_string()));
    assert!(log
        .iter()
        .any(|l| l.starts_with("run 10.0.0.1 nohup python3 -u -m http.server 8080")));
    assert!(log.contains(&"open wss://api.test.local/console/?token=console-token".to_string()));

    let vars = BootVars {
        http_ip: "10.0.0.1".to_string(),
        http_port: 8080,
    };
    let expected = bootcmd::parse(&bootcmd::render(&lines, &vars)).unwrap();
    let typed = expected
        .iter()
        .filter(|a| !matches!(a, KeyAction::Wait(_)))
        .count();
    let sent = log.iter().filter(|l| l.starts_with("send ")).count();
    assert_eq!(sent, typed);
    assert_eq!(log.iter().filter(|l| l.as_str() == "close").count(), 1);
    assert!(h.reporter.contains("a file server is ready at address: 10.0.0.1:8080"));
}

#[test]
fn step_table_has_one_producer_per_key() {
    let h = harness(iso_config());
    let builder = Builder::new(h.services.clone(), None);
    let runner = Runner::new(builder.step_table(), h.services.reporter.clone()).unwrap();
    let names = runner.step_names();
    assert_eq!(names.first(), Some(&"LookupPublicNetwork"));
    assert_eq!(names.last(), Some(&"CreateTemplate"));
    assert_eq!(names.len(), 21);
}
