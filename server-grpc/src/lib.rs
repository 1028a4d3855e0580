//! gRPC transport for the thumbnail service.

pub mod boundary;
pub mod server;

pub mod generated {
    tonic::include_proto!("youthumb.v1");
}

pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("thumbnail_descriptor");

pub use generated::thumbnail_service_client::ThumbnailServiceClient;
pub use generated::thumbnail_service_server::ThumbnailServiceServer;
pub use server::ThumbnailServer;
