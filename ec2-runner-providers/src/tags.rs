use ec2_runner_common::Tag;

/// EC2 resource types a tag specification can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Instance,
    SpotInstancesRequest,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Instance => "instance",
            ResourceKind::SpotInstancesRequest => "spot-instances-request",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TagSpecification {
    pub resource_type: ResourceKind,
    pub tags: Vec<Tag>,
}

/// Encode a generic tag list for one resource kind.
///
/// An empty list yields no specification at all: EC2 rejects a
/// specification that carries a resource type but no tags.
pub fn tag_specifications(tags: &[Tag], kind: ResourceKind) -> Vec<TagSpecification> {
    if tags.is_empty() {
        return Vec::new();
    }
    vec![TagSpecification {
        resource_type: kind,
        tags: tags.to_vec(),
    }]
}
