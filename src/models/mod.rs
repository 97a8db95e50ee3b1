pub mod lifecyclemodel;
