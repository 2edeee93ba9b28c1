use stackflow_cloud::{
    DeletionPolicy, ErrorKind, LifecycleError, LifecycleExecutor, LifecycleRequest,
    LifecycleScheduler, MemoryCheckpointStore, Phase, ResourceAction, ResourceInfo, RetryConfig,
    StackRef, Tag,
};
use stackflow_ec2::{
    Call, Principal, SNAPSHOT_ID_FOR_DELETE, SimulatedCompute, VOLUME_RESOURCE_TYPE,
    VolumeAction, VolumeProperties, VolumeStatus, VolumeTimeouts,
};
use std::sync::Arc;
use std::time::Duration;

fn compute(polls_to_settle: u32) -> Arc<SimulatedCompute> {
    Arc::new(SimulatedCompute::new(polls_to_settle).with_account_admin("user-1", "admin-1"))
}

fn properties(tags: Vec<Tag>) -> Arc<VolumeProperties> {
    Arc::new(VolumeProperties {
        availability_zone: "zone-a".to_string(),
        size: Some(8),
        tags,
        ..Default::default()
    })
}

fn info(policy: DeletionPolicy) -> ResourceInfo {
    let mut info = ResourceInfo::new("DataVolume", VOLUME_RESOURCE_TYPE)
        .with_deletion_policy(policy)
        .with_stack(StackRef {
            stack_id: "stack-1".to_string(),
            stack_name: "web".to_string(),
            account_id: "000000000001".to_string(),
            tags: vec![Tag::new("team", "storage")],
        });
    info.effective_user_id = "user-1".to_string();
    info
}

fn action(compute: &Arc<SimulatedCompute>, tags: Vec<Tag>, info: ResourceInfo) -> VolumeAction {
    VolumeAction::new(properties(tags), info, compute.clone(), compute.clone())
}

fn executor() -> LifecycleExecutor {
    LifecycleExecutor::new().with_retry(RetryConfig::fixed(Duration::from_millis(100)))
}

fn is_create_tags(call: &Call) -> bool {
    matches!(call, Call::CreateTags { .. })
}

fn is_delete(call: &Call) -> bool {
    matches!(call, Call::DeleteVolume(_))
}

fn is_snapshot(call: &Call) -> bool {
    matches!(call, Call::CreateSnapshot { .. })
}

/// Run the create chain to completion and return the resulting info
async fn created(compute: &Arc<SimulatedCompute>, policy: DeletionPolicy) -> ResourceInfo {
    let mut action = action(compute, vec![Tag::new("env", "prod")], info(policy));
    let chain = action.create_chain().unwrap();
    executor()
        .execute(&chain, &mut action, None)
        .await
        .unwrap()
        .info
}

#[tokio::test(start_paused = true)]
async fn test_create_volume_happy_path() {
    let compute = compute(3);
    let mut action = action(&compute, vec![Tag::new("env", "prod")], info(DeletionPolicy::Delete));
    let chain = action.create_chain().unwrap();

    let outcome = executor().execute(&chain, &mut action, None).await.unwrap();

    assert_eq!(
        outcome.completed_steps,
        vec!["CREATE_VOLUME", "VERIFY_AVAILABLE", "CREATE_TAGS"]
    );
    let volume_id = outcome.physical_resource_id().unwrap().to_string();
    assert!(volume_id.starts_with("vol-"));
    assert_eq!(
        outcome.reference_value_json(),
        Some(format!("\"{}\"", volume_id).as_str())
    );
    assert_eq!(compute.volume_status(&volume_id), Some(VolumeStatus::Available));

    let calls = compute.calls();
    assert_eq!(
        calls[0],
        Call::CreateVolume {
            client_token: Some("stack-1/DataVolume".to_string())
        }
    );

    // System tags as the account admin, user tags as the owner
    let tag_calls: Vec<&Call> = calls.iter().filter(|c| is_create_tags(c)).collect();
    assert_eq!(tag_calls.len(), 2);
    match tag_calls[0] {
        Call::CreateTags { principal, tags, .. } => {
            assert_eq!(*principal, Principal::Privileged("admin-1".to_string()));
            assert!(tags.iter().all(|t| t.key.starts_with("aws:cloudformation:")));
            assert_eq!(tags.len(), 3);
        }
        other => panic!("unexpected call {:?}", other),
    }
    match tag_calls[1] {
        Call::CreateTags { principal, tags, .. } => {
            assert_eq!(*principal, Principal::User("user-1".to_string()));
            assert_eq!(
                *tags,
                vec![Tag::new("team", "storage"), Tag::new("env", "prod")]
            );
        }
        other => panic!("unexpected call {:?}", other),
    }
    assert_eq!(compute.tags_of(&volume_id).len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_reserved_tag_rejected_before_tagging() {
    let compute = compute(1);
    let mut action = action(
        &compute,
        vec![Tag::new("aws:owner", "me")],
        info(DeletionPolicy::Delete),
    );
    let chain = action.create_chain().unwrap();

    let err = executor().execute(&chain, &mut action, None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.step(), Some("CREATE_TAGS"));
    assert!(err.to_string().contains("aws:"), "{}", err);
    assert_eq!(compute.count_calls(is_create_tags), 0);
    assert_eq!(
        compute.count_calls(|c| matches!(c, Call::DescribeTags(_))),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_describe_failure_is_validation() {
    let compute = compute(1);
    compute.set_fail_describe(true);
    let mut action = action(&compute, vec![], info(DeletionPolicy::Delete));
    let chain = action.create_chain().unwrap();

    let err = executor().execute(&chain, &mut action, None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.step(), Some("VERIFY_AVAILABLE"));
    assert!(err.to_string().starts_with("Error describing volume vol-"), "{}", err);
    assert!(err.to_string().ends_with(":Service Unavailable"), "{}", err);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_volume_times_out() {
    let compute = compute(1);
    compute.set_stuck_volumes(true);
    let mut action = action(&compute, vec![], info(DeletionPolicy::Delete)).with_timeouts(
        VolumeTimeouts {
            available: Duration::from_secs(2),
            ..Default::default()
        },
    );
    let chain = action.create_chain().unwrap();

    let err = executor().execute(&chain, &mut action, None).await.unwrap_err();

    match err {
        LifecycleError::Timeout { step, message, .. } => {
            assert_eq!(step, "VERIFY_AVAILABLE");
            assert!(message.ends_with("not yet available"), "{}", message);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(compute.count_calls(is_create_tags), 0);
}

#[tokio::test(start_paused = true)]
async fn test_create_volume_replay_reuses_volume() {
    let compute = compute(1);
    let before = info(DeletionPolicy::Delete);

    // The step lands but its checkpoint never does
    let mut lost = action(&compute, vec![], before.clone());
    let chain = lost.create_chain().unwrap();
    chain.get("CREATE_VOLUME").unwrap().perform(&mut lost).await.unwrap();
    let first_id = lost.info().physical_resource_id.clone().unwrap();

    let mut replay = action(&compute, vec![], before);
    let outcome = executor().execute(&chain, &mut replay, None).await.unwrap();

    assert_eq!(outcome.physical_resource_id(), Some(first_id.as_str()));
    assert_eq!(compute.volume_ids(), vec![first_id]);
    assert_eq!(
        compute.count_calls(|c| matches!(c, Call::CreateVolume { .. })),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_create_tags_replay_issues_nothing_new() {
    let compute = compute(1);
    compute.insert_volume("vol-1", "zone-a");
    let before = info(DeletionPolicy::Delete).with_physical_resource_id("vol-1");

    let mut lost = action(&compute, vec![Tag::new("env", "prod")], before.clone());
    let chain = lost.create_chain().unwrap();
    chain.get("CREATE_TAGS").unwrap().perform(&mut lost).await.unwrap();
    assert_eq!(compute.count_calls(is_create_tags), 2);
    let tags = compute.tags_of("vol-1");

    let mut replay = action(&compute, vec![Tag::new("env", "prod")], before);
    executor()
        .execute(&chain, &mut replay, Some("CREATE_TAGS"))
        .await
        .unwrap();

    assert_eq!(compute.count_calls(is_create_tags), 2);
    assert_eq!(compute.tags_of("vol-1"), tags);
}

#[tokio::test(start_paused = true)]
async fn test_retagging_issues_nothing_new() {
    let compute = compute(1);
    let mut action = action(&compute, vec![Tag::new("env", "prod")], info(DeletionPolicy::Delete));
    let chain = action.create_chain().unwrap();
    executor().execute(&chain, &mut action, None).await.unwrap();
    compute.clear_calls();

    let outcome = executor()
        .execute(&chain, &mut action, Some("CREATE_TAGS"))
        .await
        .unwrap();

    assert_eq!(outcome.completed_steps, vec!["CREATE_TAGS"]);
    assert_eq!(compute.count_calls(is_create_tags), 0);
    assert_eq!(
        compute.count_calls(|c| matches!(c, Call::DescribeTags(_))),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_resume_skips_completed_create() {
    let compute = compute(1);
    compute.insert_volume("vol-existing", "zone-a");
    let mut action = action(
        &compute,
        vec![],
        info(DeletionPolicy::Delete).with_physical_resource_id("vol-existing"),
    );
    let chain = action.create_chain().unwrap();

    let outcome = executor()
        .execute(&chain, &mut action, Some("VERIFY_AVAILABLE"))
        .await
        .unwrap();

    assert_eq!(outcome.completed_steps, vec!["VERIFY_AVAILABLE", "CREATE_TAGS"]);
    assert_eq!(
        compute.count_calls(|c| matches!(c, Call::CreateVolume { .. })),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_delete_policy_skips_snapshot() {
    let compute = compute(2);
    let info = created(&compute, DeletionPolicy::Delete).await;
    let volume_id = info.physical_resource_id.clone().unwrap();

    let mut action = action(&compute, vec![], info);
    let chain = action.delete_chain().unwrap();
    let outcome = executor().execute(&chain, &mut action, None).await.unwrap();

    assert_eq!(outcome.completed_steps.len(), 5);
    assert_eq!(compute.count_calls(is_snapshot), 0);
    assert_eq!(compute.count_calls(is_delete), 1);
    assert!(outcome.info.get_attribute::<String>(SNAPSHOT_ID_FOR_DELETE).is_none());
    assert!(compute.snapshot_ids().is_empty());
    assert_eq!(compute.volume_status(&volume_id), Some(VolumeStatus::Deleted));
}

#[tokio::test(start_paused = true)]
async fn test_delete_is_idempotent() {
    let compute = compute(1);
    let info = created(&compute, DeletionPolicy::Delete).await;

    let mut first = action(&compute, vec![], info);
    let chain = first.delete_chain().unwrap();
    let outcome = executor().execute(&chain, &mut first, None).await.unwrap();
    assert_eq!(compute.count_calls(is_delete), 1);

    // The same delete again finds nothing left to do
    let mut second = action(&compute, vec![], outcome.info);
    let outcome = executor().execute(&chain, &mut second, None).await.unwrap();

    assert_eq!(outcome.completed_steps.len(), 5);
    assert_eq!(compute.count_calls(is_delete), 1);
    assert_eq!(compute.count_calls(is_snapshot), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delete_of_missing_volume_succeeds() {
    let compute = compute(1);
    let mut action = action(
        &compute,
        vec![],
        info(DeletionPolicy::Snapshot).with_physical_resource_id("vol-gone"),
    );
    let chain = action.delete_chain().unwrap();

    executor().execute(&chain, &mut action, None).await.unwrap();

    assert_eq!(compute.count_calls(is_delete), 0);
    assert_eq!(compute.count_calls(is_snapshot), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delete_without_physical_id_is_noop() {
    let compute = compute(1);
    let mut action = action(&compute, vec![], info(DeletionPolicy::Snapshot));
    let chain = action.delete_chain().unwrap();

    executor().execute(&chain, &mut action, None).await.unwrap();

    assert!(compute.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_policy_snapshots_before_delete() {
    let compute = compute(2);
    let info = created(&compute, DeletionPolicy::Snapshot).await;
    compute.clear_calls();

    let mut action = action(&compute, vec![Tag::new("env", "prod")], info);
    let chain = action.delete_chain().unwrap();
    let outcome = executor().execute(&chain, &mut action, None).await.unwrap();

    let snapshot_id: String = outcome.info.get_attribute(SNAPSHOT_ID_FOR_DELETE).unwrap();
    assert_eq!(compute.snapshot_ids(), vec![snapshot_id.clone()]);

    let calls = compute.calls();
    let snapshot_at = calls.iter().position(is_snapshot).unwrap();
    let delete_at = calls.iter().position(is_delete).unwrap();
    assert!(snapshot_at < delete_at);

    // The snapshot carries the same tags the volume did
    let tags = compute.tags_of(&snapshot_id);
    assert!(tags.contains(&Tag::new("env", "prod")));
    assert!(tags.contains(&Tag::new("aws:cloudformation:logical-id", "DataVolume")));
}

#[tokio::test(start_paused = true)]
async fn test_create_snapshot_replay_reuses_snapshot() {
    let compute = compute(1);
    let before = created(&compute, DeletionPolicy::Snapshot).await;

    // The snapshot request lands but its checkpoint never does
    let mut lost = action(&compute, vec![], before.clone());
    let chain = lost.delete_chain().unwrap();
    chain.get("CREATE_SNAPSHOT").unwrap().perform(&mut lost).await.unwrap();
    let first: String = lost.info().get_attribute(SNAPSHOT_ID_FOR_DELETE).unwrap();

    let mut replay = action(&compute, vec![], before);
    let outcome = executor().execute(&chain, &mut replay, None).await.unwrap();

    let snapshot_id: String = outcome.info.get_attribute(SNAPSHOT_ID_FOR_DELETE).unwrap();
    assert_eq!(snapshot_id, first);
    assert_eq!(compute.snapshot_ids(), vec![first]);
    assert_eq!(compute.count_calls(is_snapshot), 2);
    assert_eq!(compute.count_calls(is_delete), 1);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_tags_replay_issues_nothing_new() {
    let compute = compute(1);
    let info = created(&compute, DeletionPolicy::Snapshot).await;

    let mut lost = action(&compute, vec![Tag::new("env", "prod")], info);
    let chain = lost.delete_chain().unwrap();
    chain.get("CREATE_SNAPSHOT").unwrap().perform(&mut lost).await.unwrap();
    chain
        .get("VERIFY_SNAPSHOT_COMPLETE")
        .unwrap()
        .perform(&mut lost)
        .await
        .unwrap();
    let before = lost.info().clone();
    let snapshot_id: String = before.get_attribute(SNAPSHOT_ID_FOR_DELETE).unwrap();

    compute.clear_calls();
    chain
        .get("CREATE_SNAPSHOT_TAGS")
        .unwrap()
        .perform(&mut lost)
        .await
        .unwrap();
    let issued = compute.count_calls(is_create_tags);
    assert!(issued > 0);
    let tags = compute.tags_of(&snapshot_id);

    let mut replay = action(&compute, vec![Tag::new("env", "prod")], before);
    executor()
        .execute(&chain, &mut replay, Some("CREATE_SNAPSHOT_TAGS"))
        .await
        .unwrap();

    assert_eq!(compute.count_calls(is_create_tags), issued);
    assert_eq!(compute.tags_of(&snapshot_id), tags);
    assert_eq!(compute.count_calls(is_delete), 1);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_error_is_fatal() {
    let compute = compute(1);
    let info = created(&compute, DeletionPolicy::Snapshot).await;
    let volume_id = info.physical_resource_id.clone().unwrap();
    compute.set_fail_snapshots(true);

    let mut action = action(&compute, vec![], info);
    let chain = action.delete_chain().unwrap();
    let err = executor().execute(&chain, &mut action, None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert_eq!(err.step(), Some("VERIFY_SNAPSHOT_COMPLETE"));
    assert!(
        err.to_string()
            .ends_with(&format!(", while deleting volume {}", volume_id)),
        "{}",
        err
    );
    assert_eq!(compute.count_calls(is_delete), 0);
    assert_eq!(compute.volume_status(&volume_id), Some(VolumeStatus::Available));
}

#[tokio::test(start_paused = true)]
async fn test_retain_leaves_volume() {
    let compute = compute(1);
    let info = created(&compute, DeletionPolicy::Retain).await;
    let volume_id = info.physical_resource_id.clone().unwrap();

    let mut action = action(&compute, vec![], info);
    let chain = action.delete_chain().unwrap();
    executor().execute(&chain, &mut action, None).await.unwrap();

    assert_eq!(compute.count_calls(is_delete), 0);
    assert_eq!(compute.count_calls(is_snapshot), 0);
    assert_eq!(compute.volume_status(&volume_id), Some(VolumeStatus::Available));
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_create_then_delete() {
    let compute = compute(2);
    let store = Arc::new(MemoryCheckpointStore::new());
    let scheduler = LifecycleScheduler::new(store.clone())
        .with_retry(RetryConfig::fixed(Duration::from_millis(100)));
    let request = LifecycleRequest::new("DataVolume", "stack-1", "000000000001", "user-1");

    let outcome = scheduler
        .create(action(&compute, vec![], info(DeletionPolicy::Delete)), &request)
        .wait()
        .await
        .unwrap();
    assert!(store.is_empty().await);

    let deleted = scheduler
        .delete(action(&compute, vec![], outcome.info), &request)
        .wait()
        .await
        .unwrap();

    assert_eq!(deleted.completed_steps.last().map(String::as_str), Some("VERIFY_DELETE"));
    assert_eq!(compute.count_calls(is_delete), 1);
    assert!(store.is_empty().await);
}

fn scheduler(store: &Arc<MemoryCheckpointStore>) -> LifecycleScheduler {
    LifecycleScheduler::new(store.clone()).with_retry(RetryConfig::fixed(Duration::from_millis(100)))
}

fn request() -> LifecycleRequest {
    LifecycleRequest::new("DataVolume", "stack-1", "000000000001", "user-1")
}

#[tokio::test(start_paused = true)]
async fn test_failed_create_rolls_back_with_returned_info() {
    let compute = compute(1);
    let store = Arc::new(MemoryCheckpointStore::new());
    let scheduler = scheduler(&store);
    let tags = vec![Tag::new("aws:owner", "me")];

    let (result, info) = scheduler
        .create(action(&compute, tags, info(DeletionPolicy::Delete)), &request())
        .wait_with_info()
        .await;
    assert_eq!(result.unwrap_err().step(), Some("CREATE_TAGS"));
    let info = info.unwrap();
    let volume_id = info.physical_resource_id.clone().unwrap();
    assert_eq!(compute.volume_status(&volume_id), Some(VolumeStatus::Available));

    scheduler
        .delete(action(&compute, vec![], info), &request())
        .wait()
        .await
        .unwrap();

    assert_eq!(compute.count_calls(is_delete), 1);
    assert_eq!(compute.volume_status(&volume_id), Some(VolumeStatus::Deleted));
    assert!(store.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_delete_resumes_from_failed_create_checkpoint() {
    let compute = compute(1);
    let store = Arc::new(MemoryCheckpointStore::new());
    let scheduler = scheduler(&store);

    scheduler
        .create(
            action(&compute, vec![Tag::new("aws:owner", "me")], info(DeletionPolicy::Delete)),
            &request(),
        )
        .wait()
        .await
        .unwrap_err();
    let volume_id = compute.volume_ids().pop().unwrap();

    // Nothing but the logical identity survives the failed run
    let fresh = ResourceInfo::new("DataVolume", VOLUME_RESOURCE_TYPE);
    let outcome = scheduler
        .resume(action(&compute, vec![], fresh), &request(), Phase::Delete)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(outcome.physical_resource_id(), Some(volume_id.as_str()));
    assert_eq!(compute.count_calls(is_delete), 1);
    assert_eq!(compute.volume_status(&volume_id), Some(VolumeStatus::Deleted));
    assert!(store.is_empty().await);
}
