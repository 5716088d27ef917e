mod dfa_test;
mod tables_test;
