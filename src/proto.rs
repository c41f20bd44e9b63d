//! Protobuf messages for exporting a finished run.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub values: Vec<f32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClusteredDataCentroids {
    #[prost(message, repeated, tag = "1")]
    pub data: Vec<FloatList>,
}

/// Cluster index per point; `-1` for points that were never assigned.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClusteredDataLabels {
    #[prost(sint32, repeated, tag = "1")]
    pub data: Vec<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClusteredRun {
    #[prost(message, repeated, tag = "1")]
    pub points: Vec<FloatList>,
    #[prost(message, optional, tag = "2")]
    pub labels: Option<ClusteredDataLabels>,
    #[prost(message, optional, tag = "3")]
    pub centroids: Option<ClusteredDataCentroids>,
}
