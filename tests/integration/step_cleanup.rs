//! Cleanup behavior of individual steps.

use crate::integration::test_utils::{harness, iso_config};
use async_trait::async_trait;
use gridbake::build::Builder;
use gridbake::cancel::CancelSignal;
use gridbake::context::{keys, ExecutionContext, LinkState};
use gridbake::error::BuildError;
use gridbake::step::{Step, StepAction};
use gridbake::steps::{
    Attach, FinishIsoInstallation, ProvisionHook, Provision, Relation, ResourceKind,
    RunProvisionHook, ServeHttpFiles, StartServer,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::test]
async fn provision_cleanup_is_idempotent() {
    let h = harness(iso_config());
    let step = Provision::new(ResourceKind::Server, h.services.clone());
    let mut ctx = ExecutionContext::new();
    ctx.put(keys::SERVER_UUID, "srv9");

    step.cleanup(&mut ctx).await.unwrap();
    step.cleanup(&mut ctx).await.unwrap();

    assert_eq!(h.provider.calls(), vec!["stop_server srv9", "delete_server srv9"]);
    assert!(!ctx.contains(keys::SERVER_UUID));
}

#[tokio::test]
async fn empty_identifiers_never_reach_the_provider() {
    let h = harness(iso_config());
    let mut ctx = ExecutionContext::new();
    ctx.put(keys::IP_ADDR_UUID, "");
    ctx.put(keys::BOOT_STORAGE_UUID, "");

    for kind in [
        ResourceKind::Server,
        ResourceKind::BootStorage,
        ResourceKind::IpAddress,
        ResourceKind::Snapshot,
        ResourceKind::Template,
    ] {
        Provision::new(kind, h.services.clone())
            .cleanup(&mut ctx)
            .await
            .unwrap();
    }
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn unlink_only_follows_a_confirmed_link() {
    let h = harness(iso_config());
    let step = Attach::new(Relation::IpAddress, h.services.clone());
    let mut ctx = ExecutionContext::new();
    ctx.put(keys::SERVER_UUID, "srv1");
    ctx.put(keys::IP_ADDR_UUID, "ip1");

    step.cleanup(&mut ctx).await.unwrap();
    ctx.put(keys::SERVER_IP_ADDR_LINKED, LinkState::Failed);
    step.cleanup(&mut ctx).await.unwrap();
    assert!(h.provider.calls().is_empty());

    ctx.put(keys::SERVER_IP_ADDR_LINKED, LinkState::Linked);
    step.cleanup(&mut ctx).await.unwrap();
    step.cleanup(&mut ctx).await.unwrap();
    assert_eq!(h.provider.calls(), vec!["unlink_ip srv1 ip1"]);
}

#[tokio::test]
async fn benign_unlink_status_counts_as_success() {
    let h = harness(iso_config());
    h.provider.fail("unlink_storage", 409, "already detached");
    let step = Attach::new(Relation::BootStorage, h.services.clone());
    let mut ctx = ExecutionContext::new();
    ctx.put(keys::SERVER_UUID, "srv1");
    ctx.put(keys::BOOT_STORAGE_UUID, "stg1");
    ctx.put(keys::SERVER_BOOT_STORAGE_LINKED, LinkState::Linked);

    step.cleanup(&mut ctx).await.unwrap();
    assert!(!ctx.contains(keys::SERVER_BOOT_STORAGE_LINKED));
}

#[tokio::test]
async fn real_cleanup_failures_ask_for_manual_removal() {
    let h = harness(iso_config());
    h.provider.fail("delete_storage", 500, "backend unavailable");
    let step = Provision::new(ResourceKind::BootStorage, h.services.clone());
    let mut ctx = ExecutionContext::new();
    ctx.put(keys::BOOT_STORAGE_UUID, "stg1");

    let err = step.cleanup(&mut ctx).await.unwrap_err();
    assert!(err.to_string().contains("Please remove it manually"));
    assert!(ctx.contains(keys::BOOT_STORAGE_UUID));
}

#[tokio::test]
async fn start_server_cleanup_leaves_stopped_servers_alone() {
    let h = harness(iso_config());
    let step = StartServer::new(h.services.clone());
    let mut ctx = ExecutionContext::new();

    step.cleanup(&mut ctx).await.unwrap();
    assert!(h.provider.calls().is_empty());

    ctx.put(keys::SERVER_UUID, "srv1");
    step.cleanup(&mut ctx).await.unwrap();
    assert_eq!(h.provider.calls(), vec!["server srv1"]);

    assert_eq!(step.run(&mut ctx, &CancelSignal::never()).await, StepAction::Continue);
    step.cleanup(&mut ctx).await.unwrap();
    assert!(h.provider.called("shutdown_server srv1"));
    assert!(!h.provider.is_powered("srv1"));
}

#[tokio::test]
async fn iso_installation_is_skipped_without_a_confirmed_link() {
    let h = harness(iso_config());
    let step = FinishIsoInstallation::new(h.services.clone());
    let mut ctx = ExecutionContext::new();
    ctx.put(keys::SERVER_UUID, "srv1");
    ctx.put(keys::ISO_IMAGE_UUID, "iso1");

    assert_eq!(step.run(&mut ctx, &CancelSignal::never()).await, StepAction::Continue);
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn file_server_cleanup_attempts_every_resource() {
    let mut config = iso_config();
    config.files = vec![PathBuf::from("preseed.cfg")];
    let h = harness(config);
    h.provider.fail("delete_server", 500, "locked");
    let step = ServeHttpFiles::new(h.services.clone());
    let mut ctx = ExecutionContext::new();
    ctx.put(keys::FILE_SERVER_UUID, "srv1");
    ctx.put(keys::FILE_SERVER_STORAGE_UUID, "stg1");
    ctx.put(keys::FILE_SERVER_IP_UUID, "ip1");

    let err = step.cleanup(&mut ctx).await.unwrap_err();
    assert!(err.to_string().contains("file server (srv1)"));
    assert!(h.provider.called("delete_storage stg1"));
    assert!(h.provider.called("delete_ip ip1"));
    assert!(ctx.contains(keys::FILE_SERVER_UUID));
    assert!(!ctx.contains(keys::FILE_SERVER_IP_UUID));
}

#[tokio::test]
async fn file_server_is_deleted_even_when_stop_fails() {
    let mut config = iso_config();
    config.files = vec![PathBuf::from("preseed.cfg")];
    let h = harness(config);
    h.provider.fail("stop_server", 500, "hypervisor busy");
    let step = ServeHttpFiles::new(h.services.clone());
    let mut ctx = ExecutionContext::new();
    ctx.put(keys::FILE_SERVER_UUID, "srv1");

    step.cleanup(&mut ctx).await.unwrap();
    assert!(h.provider.called("stop_server srv1"));
    assert!(h.provider.called("delete_server srv1"));
    assert!(!ctx.contains(keys::FILE_SERVER_UUID));
}

#[tokio::test]
async fn ssh_key_is_recorded_before_saving_the_debug_copy() {
    let mut config = iso_config();
    config.isoimage_url.clear();
    config.base_template_uuid = "base-tpl".to_string();
    config.debug_key_path = Some(PathBuf::from("/nonexistent-dir/for/gridbake/key.pem"));
    let h = harness(config);

    let outcome = Builder::new(h.services.clone(), None)
        .run(&CancelSignal::never())
        .await
        .unwrap();

    assert!(outcome.result.is_err());
    assert!(h.provider.called("create_ssh_key"));
    assert!(h.provider.called("delete_ssh_key key1"));
    assert!(h.provider.calls_to("create_storage").is_empty());
}

#[tokio::test]
async fn hook_halts_on_a_mistyped_server_address() {
    let h = harness(iso_config());
    let hook = Arc::new(RecordingHook {
        seen_ip: Mutex::new(None),
        fail: false,
    });
    let step = RunProvisionHook::new(
        Some(hook.clone() as Arc<dyn ProvisionHook>),
        h.services.reporter.clone(),
    );
    let mut ctx = ExecutionContext::new();
    ctx.put(keys::SERVER_IP, 42_i64);

    assert_eq!(step.run(&mut ctx, &CancelSignal::never()).await, StepAction::Halt);
    assert!(matches!(ctx.take_error(), Some(BuildError::Invariant(_))));
    assert!(hook.seen_ip.lock().is_none());
}

struct RecordingHook {
    seen_ip: Mutex<Option<String>>,
    fail: bool,
}

#[async_trait]
impl ProvisionHook for RecordingHook {
    async fn provision(&self, ctx: &ExecutionContext) -> Result<(), String> {
        let ip = ctx.require_id(keys::SERVER_IP).map_err(|e| e.to_string())?;
        *self.seen_ip.lock() = Some(ip.to_string());
        if self.fail {
            Err("ansible exited with status 2".to_string())
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn provisioning_hook_sees_the_server_address() {
    let h = harness(iso_config());
    let hook = Arc::new(RecordingHook {
        seen_ip: Mutex::new(None),
        fail: false,
    });
    let outcome = Builder::new(h.services.clone(), Some(hook.clone() as Arc<dyn ProvisionHook>))
        .run(&CancelSignal::never())
        .await
        .unwrap();
    assert!(outcome.result.is_ok());
    assert_eq!(hook.seen_ip.lock().as_deref(), Some("10.0.0.1"));
}

#[tokio::test]
async fn failing_hook_fails_the_build_and_cleans_up() {
    let h = harness(iso_config());
    let hook = Arc::new(RecordingHook {
        seen_ip: Mutex::new(None),
        fail: true,
    });
    let outcome = Builder::new(h.services.clone(), Some(hook as Arc<dyn ProvisionHook>))
        .run(&CancelSignal::never())
        .await
        .unwrap();

    match outcome.result {
        Err(BuildError::Hook(message)) => assert!(message.contains("status 2")),
        other => panic!("expected hook failure, got {:?}", other),
    }
    assert!(h.provider.calls_to("create_snapshot").is_empty());
    assert!(h.provider.called("delete_server srv1"));
}
