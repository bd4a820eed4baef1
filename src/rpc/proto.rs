pub mod remotelist {
    tonic::include_proto!("remotelist");
}
