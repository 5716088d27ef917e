mod loader_test;
