pub mod cf;
