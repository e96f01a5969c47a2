pub mod cancel_job;
pub mod delete_job;
pub mod list_jobs;
pub mod run_backtest;
pub mod show_results;
