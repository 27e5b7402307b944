// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authenticates signed groups between two peers. The key is the X25519
//! shared secret of the sender's private key and the recipient's public key,
//! which both ends derive identically. An empty plaintext is sealed with the
//! group bytes as associated data, so the tag authenticates without hiding
//! anything.

use crate::error::SignerError;
use crate::value::{NONCE_LEN, TAG_LEN};
use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{Tag, XChaCha20Poly1305, XNonce};
use loom_wglink_common::{WgKeyPair, WgPublicKey, KEY_LEN};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use zeroize::Zeroizing;

pub struct Signer {
	keypair: WgKeyPair,
	secrets: Mutex<HashMap<WgPublicKey, Zeroizing<[u8; KEY_LEN]>>>,
}

impl Signer {
	pub fn new(keypair: WgKeyPair) -> Self {
		Self {
			keypair,
			secrets: Mutex::new(HashMap::new()),
		}
	}

	pub fn public_key(&self) -> &WgPublicKey {
		self.keypair.public_key()
	}

	fn cipher_for(&self, peer: &WgPublicKey) -> XChaCha20Poly1305 {
		let secret = match self.secrets.lock() {
			Ok(mut cache) => cache
				.entry(*peer)
				.or_insert_with(|| self.keypair.private_key().shared_secret(peer))
				.clone(),
			// A poisoned cache only costs us the memoization.
			Err(_) => self.keypair.private_key().shared_secret(peer),
		};
		XChaCha20Poly1305::new((&*secret).into())
	}

	/// Produces the nonce and tag authenticating `data` for `recipient`.
	pub fn sign_for(
		&self,
		data: &[u8],
		recipient: &WgPublicKey,
	) -> Result<([u8; NONCE_LEN], [u8; TAG_LEN]), SignerError> {
		let mut nonce = [0u8; NONCE_LEN];
		OsRng.fill_bytes(&mut nonce);

		let mut empty: [u8; 0] = [];
		let tag = self
			.cipher_for(recipient)
			.encrypt_in_place_detached(XNonce::from_slice(&nonce), data, &mut empty)
			.map_err(|_| SignerError::Seal)?;

		let mut out = [0u8; TAG_LEN];
		out.copy_from_slice(tag.as_slice());
		Ok((nonce, out))
	}

	/// `Ok(())` means `data` was signed by `sender` for us.
	pub fn verify_from(
		&self,
		nonce: &[u8; NONCE_LEN],
		tag: &[u8; TAG_LEN],
		data: &[u8],
		sender: &WgPublicKey,
	) -> Result<(), SignerError> {
		let mut empty: [u8; 0] = [];
		self.cipher_for(sender)
			.decrypt_in_place_detached(
				XNonce::from_slice(nonce),
				data,
				&mut empty,
				Tag::from_slice(tag),
			)
			.map_err(|_| SignerError::Verification)
	}
}

impl fmt::Debug for Signer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Signer")
			.field("public_key", self.keypair.public_key())
			.finish_non_exhaustive()
	}
}
