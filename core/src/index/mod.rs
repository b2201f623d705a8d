mod memory;
mod records;

pub use memory::{IndexKey, ResourceIndex};
pub use records::{RecordStore, RecordStoreError};

#[cfg(test)]
pub(crate) mod test_utils {
	use std::path::PathBuf;

	use chrono::Utc;

	use crate::resource::{
		ContentHash, FileType, Resource, ResourceDomain, ResourceMetadata, ResourceType,
	};

	pub(crate) fn resource(hash: &str, path: &str) -> Resource {
		let path = PathBuf::from(path);
		let file_name = path
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_default();
		let now = Utc::now();
		let hash = ContentHash::parse(hash).unwrap();
		Resource {
			size: 3,
			ino: 0,
			name: file_name.trim_end_matches(".jar").to_string(),
			file_name,
			ext: ".jar".into(),
			stored_path: Some(path.clone()),
			path,
			domain: ResourceDomain::Mods,
			resource_type: ResourceType::Unknown,
			file_type: FileType::Jar,
			metadata: ResourceMetadata::default(),
			uris: [hash.uri()].into_iter().collect(),
			tags: Default::default(),
			icons: Vec::new(),
			created_at: now,
			updated_at: now,
			hash,
		}
	}
}
