pub mod adapter;
pub mod domain;
pub mod infrastructure;
pub mod usecase;

/// テスト用インメモリリポジトリとヘルパー（統合テストから利用）
pub mod test_support;
