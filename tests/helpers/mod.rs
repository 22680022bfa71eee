// ABOUTME: Test helper modules for the integration suites
// ABOUTME: HTTP request utilities over axum routers without a running server
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

#![allow(dead_code)]

pub mod axum_test;
