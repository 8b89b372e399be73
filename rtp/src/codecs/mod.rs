pub mod generic;
pub mod h264;
pub mod h264_svc;
pub mod h265;
pub mod h265_shvc;
