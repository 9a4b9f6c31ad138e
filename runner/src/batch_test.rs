use crate::batch::{parse_job_id, parse_queue_status, QueueStatus};

#[test]
pub fn job_id_from_acknowledgement() {
    assert_eq!(
        parse_job_id("Submitted batch job 4242\n"),
        Some("4242".to_owned())
    );
    assert_eq!(
        parse_job_id("sbatch: warning: no time limit\nSubmitted batch job 7"),
        Some("7".to_owned())
    );
    assert_eq!(parse_job_id("sbatch: error: Batch job submission failed"), None);
}

#[test]
pub fn status_from_last_column() {
    assert_eq!(parse_queue_status("4242 PD\n", "4242"), QueueStatus::Pending);
    assert_eq!(parse_queue_status("4242 CG\n", "4242"), QueueStatus::Completing);
    assert_eq!(
        parse_queue_status("  4242   R\n", "4242"),
        QueueStatus::Running("R".to_owned())
    );
}

#[test]
pub fn finished_states() {
    assert!(parse_queue_status("", "1").is_finished());
    assert!(parse_queue_status("\n  \n", "1").is_finished());
    assert!(parse_queue_status("1 CG", "1").is_finished());
    // only other jobs listed
    assert!(parse_queue_status("2 R\n3 PD\n", "1").is_finished());

    assert!(!parse_queue_status("1 PD", "1").is_finished());
    assert!(!parse_queue_status("1 R", "1").is_finished());
}

#[test]
pub fn garbage_is_not_finished() {
    let status = parse_queue_status("slurm_load_jobs error: Socket timed out", "1");

    assert_eq!(status, QueueStatus::Unknown);
    assert!(!status.is_finished());
    assert_eq!(parse_queue_status("1", "1"), QueueStatus::Unknown);
}
