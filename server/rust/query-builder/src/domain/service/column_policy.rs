use std::collections::HashSet;

/// 機密カラムとテナント分離カラムの扱いを決める。
///
/// 機密カラムとテナントカラムは選択・結合・一覧表示のいずれにも使えない。
/// テナントカラムを持つテーブルは要求者のテナントで常に絞り込まれる。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnPolicy {
    sensitive_columns: HashSet<String>,
    tenant_column: Option<String>,
}

impl ColumnPolicy {
    pub fn new<I, S>(sensitive_columns: I, tenant_column: Option<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            sensitive_columns: sensitive_columns
                .into_iter()
                .map(|c| c.as_ref().trim().to_ascii_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
            tenant_column: tenant_column
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        }
    }

    pub fn tenant_column(&self) -> Option<&str> {
        self.tenant_column.as_deref()
    }

    /// 大文字小文字を区別せずに照合する。
    pub fn is_restricted(&self, column: &str) -> bool {
        let lower = column.to_ascii_lowercase();
        self.sensitive_columns.contains(&lower)
            || self
                .tenant_column
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case(column))
    }

    /// カラム名一覧にテナントカラムが含まれるか。
    pub fn is_tenant_scoped<'c, I>(&self, columns: I) -> bool
    where
        I: IntoIterator<Item = &'c str>,
    {
        match self.tenant_column.as_deref() {
            Some(tenant) => columns.into_iter().any(|c| c.eq_ignore_ascii_case(tenant)),
            None => false,
        }
    }
}
