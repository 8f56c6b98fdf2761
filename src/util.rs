pub mod dir_lock;
