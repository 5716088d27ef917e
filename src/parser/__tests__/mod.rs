mod ll_test;
mod recovery_test;
mod types_test;
