// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Built-in stages

pub mod aggregate;
pub mod identity;
pub mod sort;
pub mod union;

pub use aggregate::AggregateTransformation;
pub use identity::IdentityTransformation;
pub use sort::SortTransformation;
pub use union::UnionTransformation;

use super::error::ExecutionError;
use super::registry::{ProcedureRegistry, StageArgs};
use super::transformation::Transformation;
use crate::plan::StageSpec;

/// Construct the stage described by `spec`
pub fn create_stage(
    spec: &StageSpec,
    args: StageArgs,
    registry: &ProcedureRegistry,
) -> Result<Box<dyn Transformation>, ExecutionError> {
    let stage: Box<dyn Transformation> = match spec {
        StageSpec::Identity => Box::new(IdentityTransformation::new(args.into_passthrough())),
        StageSpec::Union => Box::new(UnionTransformation::new(args.into_dataset())),
        StageSpec::Aggregate { kind, column } => Box::new(AggregateTransformation::new(
            args.into_dataset(),
            *kind,
            column.clone(),
        )),
        StageSpec::Sort { columns, desc } => {
            let alloc = args.alloc.clone();
            Box::new(SortTransformation::new(
                args.into_dataset(),
                columns.clone(),
                *desc,
                alloc,
            ))
        }
        StageSpec::External { kind, config } => registry.create_stage(kind, config, args)?,
    };
    Ok(stage)
}
