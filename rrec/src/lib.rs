pub mod idrec;
