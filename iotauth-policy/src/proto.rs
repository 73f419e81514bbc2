#![allow(clippy::all)]

tonic::include_proto!("iotauth.v1");
