pub mod common;

mod dashboard_test;
mod pipeline_test;
