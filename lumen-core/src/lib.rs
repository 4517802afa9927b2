//! Lumen Core
//!
//! Core types shared by the Lumen editing agent and its coordination client.
//!
//! This crate contains:
//! - Domain types: jobs, staged edit pipelines, and transport messages
//! - DTOs: request/response bodies exchanged with the coordination service

pub mod domain;
pub mod dto;
