mod value_test;
