// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Migration Task
//!
//! The resolved, immutable pairing of a source and destination endpoint
//! with the request that produced them. Built once per engine run and
//! shared read-only by every strategy attempt.

use std::sync::Arc;

use crate::domain::endpoint::VolumeEndpoint;
use crate::domain::request::{MigrationOptions, MigrationRequest};

#[derive(Debug)]
pub struct Task {
    request: MigrationRequest,
    source: Arc<VolumeEndpoint>,
    dest: Arc<VolumeEndpoint>,
}

impl Task {
    pub fn new(request: MigrationRequest, source: VolumeEndpoint, dest: VolumeEndpoint) -> Self {
        Self {
            request,
            source: Arc::new(source),
            dest: Arc::new(dest),
        }
    }

    pub fn request(&self) -> &MigrationRequest {
        &self.request
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.request.options
    }

    pub fn source(&self) -> &Arc<VolumeEndpoint> {
        &self.source
    }

    pub fn dest(&self) -> &Arc<VolumeEndpoint> {
        &self.dest
    }

    /// Both claims are reachable through one control plane.
    pub fn same_cluster(&self) -> bool {
        self.source.same_cluster(&self.dest)
    }

    pub fn same_namespace(&self) -> bool {
        self.source.namespace() == self.dest.namespace()
    }
}
