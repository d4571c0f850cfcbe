mod common;

mod accounting_test;
mod lifecycle_test;
