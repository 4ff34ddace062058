//! End-to-end flow through the service with real workers and a filesystem store.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use cleanser::{
    Cleanser, FsArtifactStore, JobState, Limits, MissingStrategy, PreprocessOptions, ServiceError,
    TaskStatus, ValidationError,
};
use tempfile::TempDir;

const SALES: &[u8] = b"Order ID,Customer Name,Amount ($),Region\n\
1, Ada ,10,North\n\
2,Grace,,South\n\
1, Ada ,10,North\n\
3,Linus,30,\n";

fn start(dir: &TempDir) -> Cleanser {
    let store = FsArtifactStore::open_dir(dir.path().join("uploads")).unwrap();
    let (service, _workers) = Cleanser::start(Arc::new(store), Limits::default(), 2);
    service
}

async fn poll_until_terminal(service: &Cleanser, task_id: &str) -> Vec<TaskStatus> {
    let mut seen = Vec::new();
    for _ in 0..500 {
        let status = service.get_task_status(task_id).unwrap();
        let done = status.status.is_terminal();
        seen.push(status);
        if done {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never finished");
}

fn read_download(service: &Cleanser, file_id: &str) -> String {
    let mut download = service.open_download(file_id).unwrap();
    let mut out = String::new();
    download.reader.read_to_string(&mut out).unwrap();
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_analyze_preprocess_download() {
    let dir = TempDir::new().unwrap();
    let service = start(&dir);

    let upload = service
        .upload(SALES, SALES.len() as u64, Some("sales.csv"))
        .unwrap();
    assert_eq!(upload.preview.len(), 4);
    assert_eq!(upload.quality_report["total_rows"], 4);
    assert_eq!(upload.quality_report["duplicate_rows"], 1);

    let report = service.analyze(&upload.file_id).unwrap();
    assert_eq!(report.missing_cells, 2);
    assert_eq!(report.total_cells, 16);

    let options = PreprocessOptions {
        remove_duplicates: true,
        standardize_columns: true,
        trim_whitespace: true,
        convert_types: true,
        handle_missing: MissingStrategy::FillMean,
    };
    let submission = service.submit_preprocess(&upload.file_id, options).unwrap();
    assert_eq!(submission.status, JobState::Queued);

    let history = poll_until_terminal(&service, &submission.task_id).await;

    // states only move forward and progress never decreases
    let rank = |s: JobState| match s {
        JobState::Queued => 0,
        JobState::Processing => 1,
        JobState::Completed | JobState::Failed => 2,
    };
    for pair in history.windows(2) {
        assert!(rank(pair[0].status) <= rank(pair[1].status));
        if let (Some(a), Some(b)) = (pair[0].progress, pair[1].progress) {
            assert!(a <= b);
        }
    }

    let last = history.last().unwrap();
    assert_eq!(last.status, JobState::Completed);
    let result = last.result.clone().unwrap();
    assert_eq!(result.rows_processed, 3);
    assert_eq!(result.rows_removed, 1);
    assert_eq!(result.columns, vec!["order_id", "customer_name", "amount", "region"]);

    let cleaned = read_download(&service, &result.output_file_id);
    assert_eq!(
        cleaned,
        "order_id,customer_name,amount,region\n1,Ada,10,North\n2,Grace,20,South\n3,Linus,30,\n"
    );

    // the original is untouched and still downloadable
    assert_eq!(read_download(&service, &upload.file_id).as_bytes(), SALES);
    let output = service.open_download(&result.output_file_id).unwrap();
    assert_eq!(output.file.download_name(), "processed_sales.csv");
}

#[tokio::test]
async fn oversize_upload_is_rejected_and_nothing_is_enqueued() {
    let dir = TempDir::new().unwrap();
    let service = start(&dir);

    let err = service
        .upload(b"a\n1\n", 120 * 1024 * 1024, Some("big.csv"))
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Validation(ValidationError::FileTooLarge { .. })
    ));
    assert!(service.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_fails_when_input_vanishes_and_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let store = FsArtifactStore::open_dir(dir.path().join("uploads")).unwrap();
    let (service, receiver) = Cleanser::new(Arc::new(store), Limits::default());
    let upload = service.upload(b"n\n1\n2\n", 6, Some("n.csv")).unwrap();

    let submission = service
        .submit_preprocess(&upload.file_id, PreprocessOptions::default())
        .unwrap();
    std::fs::remove_file(dir.path().join("uploads").join(format!("{}.json", upload.file_id))).unwrap();

    // workers start only after the input is gone
    service.spawn_workers(receiver, 1);
    let history = poll_until_terminal(&service, &submission.task_id).await;
    let last = history.last().unwrap();
    assert_eq!(last.status, JobState::Failed);
    assert!(last.error.as_deref().unwrap().contains(&upload.file_id));
    assert!(last.result.is_none());

    // still failed a while later: no retry
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(service.get_task_status(&submission.task_id).unwrap().status, JobState::Failed);

    let err = service
        .submit_preprocess(&upload.file_id, PreprocessOptions::default())
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn many_jobs_complete_independently() {
    let dir = TempDir::new().unwrap();
    let service = start(&dir);
    let upload = service.upload(b"x,y\n1,\n,2\n1,\n", 14, None).unwrap();

    let strategies = [
        MissingStrategy::None,
        MissingStrategy::Drop,
        MissingStrategy::FillMean,
        MissingStrategy::FillMedian,
        MissingStrategy::FillMode,
    ];
    let mut tasks = Vec::new();
    for strategy in strategies {
        let options = PreprocessOptions { handle_missing: strategy, ..PreprocessOptions::default() };
        tasks.push(service.submit_preprocess(&upload.file_id, options).unwrap().task_id);
    }

    for task_id in &tasks {
        let history = poll_until_terminal(&service, task_id).await;
        assert_eq!(history.last().unwrap().status, JobState::Completed);
    }

    let drop = service.get_task_status(&tasks[1]).unwrap().result.unwrap();
    assert_eq!(drop.rows_processed, 0);
    let mean = service.get_task_status(&tasks[2]).unwrap().result.unwrap();
    assert!(mean.unresolved_columns.is_empty());
    assert_eq!(read_download(&service, &mean.output_file_id), "x,y\n1,2\n1,2\n1,2\n");
}
