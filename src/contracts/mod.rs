pub mod orchid;
